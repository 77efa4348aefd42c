use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::permissions::normalize_tree;
use super::platform::{ensure_min_disk_space, host_arch, resolve_build};
use crate::core::archive::{extract_archive, is_single_segment};
use crate::core::downloader::{file_name_from_url, Downloader, Phase, StepTracker};
use crate::core::error::{ModuleError, ModuleResult};
use crate::core::manifest::{BuildSpecByArch, DependencyMap};

pub const DEPS_DIR: &str = "deps";

/// Where one dependency currently is in its install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyState {
    Pending,
    Downloading,
    Extracting,
    Installed,
    Failed,
}

/// Result of installing a single dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledDependency {
    pub name: String,
    /// Build key that was used: the host arch or `universal`.
    pub arch: String,
    pub file_name: String,
    pub extracted: bool,
    pub downloaded_bytes: u64,
}

/// Downloads and unpacks the binaries a module declares under `dependencies`.
#[derive(Debug, Clone)]
pub struct DependencyInstaller {
    downloader: Downloader,
    arch: String,
    min_free_disk_bytes: u64,
}

impl DependencyInstaller {
    pub fn new(downloader: Downloader, min_free_disk_bytes: u64) -> Self {
        Self {
            downloader,
            arch: host_arch(),
            min_free_disk_bytes,
        }
    }

    /// Overrides the detected host architecture.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Progress steps needed for `deps`: one download each, plus one extraction when
    /// the resolved build is an archive.
    pub fn estimate_steps(&self, deps: &DependencyMap) -> usize {
        deps.iter()
            .map(|(name, builds)| match resolve_build(name, builds, &self.arch) {
                Ok((_, spec)) if spec.unzip => 2,
                _ => 1,
            })
            .sum()
    }

    /// Installs `deps` under `<module_dir>/deps/` sequentially, in declaration order.
    /// The first failure aborts the rest.
    #[instrument(skip(self, deps, steps, cancel), fields(module = %folder_name(module_dir), count = deps.len()))]
    pub async fn install_dependencies(
        &self,
        module_dir: &Path,
        deps: &DependencyMap,
        steps: &mut StepTracker,
        cancel: &CancellationToken,
    ) -> ModuleResult<Vec<InstalledDependency>> {
        if deps.is_empty() {
            return Ok(Vec::new());
        }
        check_dependency_names(&folder_name(module_dir), deps)?;
        let deps_root = module_dir.join(DEPS_DIR);
        tokio::fs::create_dir_all(&deps_root)
            .await
            .map_err(|source| ModuleError::io(&deps_root, source))?;

        let mut installed = Vec::with_capacity(deps.len());
        for (name, builds) in deps {
            let target = deps_root.join(name);
            installed.push(self.install_one(name, builds, &target, steps, cancel).await?);
        }

        normalize_tree(&deps_root).await;
        info!("Installed {} dependencies into {:?}", installed.len(), deps_root);
        Ok(installed)
    }

    /// Resolves, downloads and optionally extracts one dependency into `target_dir`.
    pub async fn install_one(
        &self,
        name: &str,
        builds: &BuildSpecByArch,
        target_dir: &Path,
        steps: &mut StepTracker,
        cancel: &CancellationToken,
    ) -> ModuleResult<InstalledDependency> {
        let mut state = DependencyState::Pending;
        let result = self
            .run_pipeline(name, builds, target_dir, steps, cancel, &mut state)
            .await;
        match &result {
            Ok(_) => debug!("{}: {:?}", name, DependencyState::Installed),
            Err(e) if e.is_cancelled() => {
                info!("{}: cancelled while {:?}", name, state)
            }
            Err(e) => warn!("{}: {:?} while {:?}: {}", name, DependencyState::Failed, state, e),
        }
        result
    }

    async fn run_pipeline(
        &self,
        name: &str,
        builds: &BuildSpecByArch,
        target_dir: &Path,
        steps: &mut StepTracker,
        cancel: &CancellationToken,
        state: &mut DependencyState,
    ) -> ModuleResult<InstalledDependency> {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let (arch, spec) = resolve_build(name, builds, &self.arch)?;
        let file_name = file_name_from_url(&spec.link)?;

        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|source| ModuleError::io(target_dir, source))?;
        ensure_min_disk_space(target_dir, self.min_free_disk_bytes)?;

        *state = DependencyState::Downloading;
        steps.begin(Phase::Downloading, format!("Downloading {name} ({arch})"));
        let archive_path: PathBuf = target_dir.join(&file_name);
        let outcome = self
            .downloader
            .download_file(&spec.link, &archive_path, steps.sink(), cancel)
            .await?;

        if spec.unzip {
            *state = DependencyState::Extracting;
            steps.begin(Phase::Extracting, format!("Extracting {name}"));
            extract_archive(&archive_path, target_dir, cancel).await?;
            if let Err(e) = tokio::fs::remove_file(&archive_path).await {
                warn!("Could not delete archive {:?}: {}", archive_path, e);
            }
        }

        Ok(InstalledDependency {
            name: name.to_string(),
            arch: arch.to_string(),
            file_name,
            extracted: spec.unzip,
            downloaded_bytes: outcome.downloaded_bytes,
        })
    }
}

/// Every dependency name becomes `deps/<name>`, so each must be one plain segment.
pub fn check_dependency_names(folder: &str, deps: &DependencyMap) -> ModuleResult<()> {
    match deps.keys().find(|name| !is_single_segment(name)) {
        Some(bad) => Err(ModuleError::InvalidManifest {
            folder: folder.to_string(),
            reason: format!("dependency name {bad:?} is not a plain folder name"),
        }),
        None => Ok(()),
    }
}

fn folder_name(module_dir: &Path) -> String {
    module_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
