use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use super::settings::{default_data_dir, EngineSettings};
use crate::core::deps::DependencyInstaller;
use crate::core::downloader::Downloader;
use crate::core::error::{ModuleError, ModuleResult};
use crate::core::hooks::HookRegistry;
use crate::core::http::build_http_client;
use crate::core::lifecycle::{ManagerParts, ModuleManager};
use crate::core::manifest::{ModuleStore, RegistryClient};

const MODULES_DIR: &str = "modules";
const CACHE_DIR: &str = "cache";

/// Engine wiring: resolved directories, settings and the shared module manager.
pub struct EngineState {
    pub data_dir: PathBuf,
    pub settings: EngineSettings,
    pub http_client: Client,
    pub manager: Arc<ModuleManager>,
}

impl EngineState {
    /// Uses the default data directory and the settings file found there.
    pub fn new(hooks: HookRegistry) -> ModuleResult<Self> {
        Self::with_data_dir(default_data_dir(), hooks)
    }

    pub fn with_data_dir(data_dir: PathBuf, hooks: HookRegistry) -> ModuleResult<Self> {
        std::fs::create_dir_all(&data_dir).map_err(|source| ModuleError::io(&data_dir, source))?;
        let settings = EngineSettings::load_or_default(&data_dir);
        Self::from_settings(data_dir, settings, hooks)
    }

    pub fn from_settings(
        data_dir: PathBuf,
        settings: EngineSettings,
        hooks: HookRegistry,
    ) -> ModuleResult<Self> {
        let http_client = build_http_client(&settings.http)?;
        let downloader = Downloader::new(http_client.clone())
            .with_progress_interval(Duration::from_millis(settings.progress_interval_ms));

        let manager = ModuleManager::new(ManagerParts {
            store: ModuleStore::new(modules_dir(&data_dir)),
            registry: RegistryClient::new(http_client.clone(), settings.registry.clone()),
            installer: DependencyInstaller::new(downloader, settings.min_free_disk_bytes),
            cache_dir: cache_dir(&data_dir),
            remote_cache_ttl_secs: settings.remote_cache_ttl_secs,
            hooks,
        });

        info!(
            "Engine data at {:?}, registry {}",
            data_dir,
            settings.registry.repo_key()
        );
        Ok(Self {
            data_dir,
            settings,
            http_client,
            manager: Arc::new(manager),
        })
    }

    pub fn modules_dir(&self) -> PathBuf {
        modules_dir(&self.data_dir)
    }

    pub fn cache_dir(&self) -> PathBuf {
        cache_dir(&self.data_dir)
    }

    pub fn save_settings(&self) -> std::io::Result<()> {
        self.settings.save(&self.data_dir)
    }
}

fn modules_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(MODULES_DIR)
}

fn cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(CACHE_DIR)
}
