// ─── Module Hooks ───
// Optional capabilities a module can provide. The controller asks a module's
// `ModuleHooks` for each capability and treats `None` as "not offered".
//
// Hooks run in-process with the same privileges as the controller. Nothing here
// isolates a misbehaving hook.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::ModuleResult;
use crate::core::manifest::{BuildSpecByArch, DependencyMap};

/// Everything a hook may need about the module it belongs to.
pub struct HookContext<'a> {
    pub folder: &'a str,
    pub module_dir: &'a Path,
    pub http_client: &'a reqwest::Client,
}

/// A saved game as the launcher knows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRef {
    pub title: String,
    /// Executable, bundle or entry file of the game.
    pub path: PathBuf,
    /// Module folder that runs this game.
    pub engine: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Everything handed to a module's launcher.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub game_path: PathBuf,
    pub game_folder: PathBuf,
    pub game_args: Map<String, Value>,
    pub game_title: String,
}

/// Blocking dialogs supplied by the UI layer.
#[async_trait]
pub trait UiHandle: Send + Sync {
    async fn alert(&self, message: &str, title: &str);
    async fn confirm(&self, message: &str, title: &str) -> bool;
}

/// Reports dependencies that have newer builds, in manifest `dependencies` shape.
#[async_trait]
pub trait UpdateChecker: Send + Sync {
    async fn check_updates(&self, ctx: &HookContext<'_>) -> ModuleResult<DependencyMap>;
}

#[async_trait]
pub trait PostUpdateHook: Send + Sync {
    async fn post_update(&self, ctx: &HookContext<'_>, updated_deps: &[String]) -> ModuleResult<()>;
}

#[async_trait]
pub trait PostDeleteHook: Send + Sync {
    async fn post_delete(
        &self,
        ctx: &HookContext<'_>,
        game_title: &str,
        game_folder: &Path,
        game_path: &Path,
        ui: &dyn UiHandle,
    ) -> ModuleResult<()>;
}

/// Spawns the game process.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        ctx: &HookContext<'_>,
        request: &LaunchRequest,
        ui: &dyn UiHandle,
    ) -> ModuleResult<()>;
}

/// Lists installable versions for a multi-version argument: version → builds.
#[async_trait]
pub trait VersionCatalog: Send + Sync {
    async fn available_versions(
        &self,
        ctx: &HookContext<'_>,
    ) -> ModuleResult<IndexMap<String, BuildSpecByArch>>;
}

/// Capabilities of one module. Every getter defaults to "not offered".
pub trait ModuleHooks: Send + Sync {
    fn update_checker(&self) -> Option<&dyn UpdateChecker> {
        None
    }

    fn post_update(&self) -> Option<&dyn PostUpdateHook> {
        None
    }

    fn post_delete(&self) -> Option<&dyn PostDeleteHook> {
        None
    }

    fn launcher(&self) -> Option<&dyn Launcher> {
        None
    }

    fn version_catalog(&self) -> Option<&dyn VersionCatalog> {
        None
    }
}

/// Hook implementations keyed by module folder.
#[derive(Default, Clone)]
pub struct HookRegistry {
    modules: HashMap<String, Arc<dyn ModuleHooks>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, folder: impl Into<String>, hooks: Arc<dyn ModuleHooks>) {
        self.modules.insert(folder.into(), hooks);
    }

    pub fn get(&self, folder: &str) -> Option<Arc<dyn ModuleHooks>> {
        self.modules.get(folder).cloned()
    }

    pub fn folders(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut folders: Vec<&str> = self.folders().collect();
        folders.sort_unstable();
        f.debug_struct("HookRegistry").field("modules", &folders).finish()
    }
}
