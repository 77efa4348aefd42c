use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::model::{ModuleManifest, MANIFEST_FILE};
use crate::core::archive::is_single_segment;
use crate::core::error::{ModuleError, ModuleResult};

/// Rejects folder names that would resolve outside the modules root.
pub fn validate_folder(folder: &str) -> ModuleResult<()> {
    if is_single_segment(folder) {
        Ok(())
    } else {
        Err(ModuleError::InvalidFolder(folder.to_string()))
    }
}

/// Installed modules on disk: one folder per module under `modules_dir`.
#[derive(Debug, Clone)]
pub struct ModuleStore {
    modules_dir: PathBuf,
}

impl ModuleStore {
    pub fn new(modules_dir: PathBuf) -> Self {
        Self { modules_dir }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn module_dir(&self, folder: &str) -> PathBuf {
        self.modules_dir.join(folder)
    }

    pub fn deps_dir(&self, folder: &str) -> PathBuf {
        self.module_dir(folder).join("deps")
    }

    pub fn manifest_path(&self, folder: &str) -> PathBuf {
        self.module_dir(folder).join(MANIFEST_FILE)
    }

    pub async fn is_installed(&self, folder: &str) -> bool {
        tokio::fs::metadata(self.module_dir(folder))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Folder names of installed modules. Empty when the root is missing or unreadable.
    pub async fn list_installed(&self) -> BTreeSet<String> {
        let mut installed = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.modules_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot list modules at {:?}: {}", self.modules_dir, e);
                }
                return installed;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_dir = entry
                        .file_type()
                        .await
                        .map(|t| t.is_dir())
                        .unwrap_or(false);
                    if is_dir {
                        installed.insert(entry.file_name().to_string_lossy().to_string());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopped listing modules at {:?}: {}", self.modules_dir, e);
                    break;
                }
            }
        }
        installed
    }

    /// Reads and parses the manifest of one installed module.
    pub async fn read_manifest(&self, folder: &str) -> ModuleResult<ModuleManifest> {
        let path = self.manifest_path(folder);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModuleError::ManifestNotFound(folder.to_string()))
            }
            Err(source) => return Err(ModuleError::io(path, source)),
        };
        serde_json::from_str(&json).map_err(|e| ModuleError::InvalidManifest {
            folder: folder.to_string(),
            reason: e.to_string(),
        })
    }

    /// Manifests of every installed module. Unreadable or corrupt manifests are logged and left out.
    pub async fn read_local_manifests(&self) -> BTreeMap<String, ModuleManifest> {
        let mut manifests = BTreeMap::new();
        for folder in self.list_installed().await {
            match self.read_manifest(&folder).await {
                Ok(manifest) => {
                    manifests.insert(folder, manifest);
                }
                Err(ModuleError::ManifestNotFound(_)) => {
                    debug!("Module {} has no manifest.json", folder);
                }
                Err(e) => warn!("Bad manifest in {}: {}", folder, e),
            }
        }
        manifests
    }

    /// Removes a module folder. Missing folders are not an error.
    pub async fn remove_module(&self, folder: &str) -> ModuleResult<()> {
        validate_folder(folder)?;
        let dir = self.module_dir(folder);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ModuleError::io(dir, source)),
        }
    }
}
