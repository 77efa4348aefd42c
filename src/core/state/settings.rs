use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::http::APP_USER_AGENT;

pub const APP_DIR_NAME: &str = "Xenolauncher";
pub const SETTINGS_FILE: &str = "engine_settings.json";
pub const DATA_DIR_ENV: &str = "ENGINE_MODULES_DATA_DIR";

/// GitHub-style repository hosting the module registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrySettings {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Overrides `https://api.github.com/repos/{owner}/{repo}/contents`.
    pub api_base: Option<String>,
    /// Overrides `https://raw.githubusercontent.com/{owner}/{repo}/{branch}`.
    pub raw_base: Option<String>,
    /// Directory inside the repository that holds one subdirectory per module.
    pub modules_path: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            owner: "m5kro".to_string(),
            repo: "Xenolauncher".to_string(),
            branch: "main".to_string(),
            api_base: None,
            raw_base: None,
            modules_path: "modules".to_string(),
        }
    }
}

impl RegistrySettings {
    pub fn api_base(&self) -> String {
        self.api_base.clone().unwrap_or_else(|| {
            format!(
                "https://api.github.com/repos/{}/{}/contents",
                self.owner, self.repo
            )
        })
    }

    pub fn raw_base(&self) -> String {
        self.raw_base.clone().unwrap_or_else(|| {
            format!(
                "https://raw.githubusercontent.com/{}/{}/{}",
                self.owner, self.repo, self.branch
            )
        })
    }

    /// Cache key, `owner/repo@branch`.
    pub fn repo_key(&self) -> String {
        format!("{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    /// Per-read timeout; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: APP_USER_AGENT.to_string(),
            timeout_secs: 120,
        }
    }
}

/// Persisted engine configuration. Every field is defaulted so older or partial
/// files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    pub registry: RegistrySettings,
    pub http: HttpSettings,
    pub remote_cache_ttl_secs: i64,
    pub min_free_disk_bytes: u64,
    pub progress_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            registry: RegistrySettings::default(),
            http: HttpSettings::default(),
            remote_cache_ttl_secs: 60 * 30,
            min_free_disk_bytes: 256 * 1024 * 1024,
            progress_interval_ms: 250,
        }
    }
}

impl EngineSettings {
    /// Loads `engine_settings.json` from `data_dir`; a missing or malformed file yields defaults.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring malformed settings at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(data_dir.join(SETTINGS_FILE), json)
    }
}

/// Resolves the data directory: `$ENGINE_MODULES_DATA_DIR`, else `<data_dir>/Xenolauncher`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_urls() {
        let registry = RegistrySettings::default();
        assert_eq!(
            registry.api_base(),
            "https://api.github.com/repos/m5kro/Xenolauncher/contents"
        );
        assert_eq!(
            registry.raw_base(),
            "https://raw.githubusercontent.com/m5kro/Xenolauncher/main"
        );
        assert_eq!(registry.repo_key(), "m5kro/Xenolauncher@main");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{ "registry": { "branch": "dev" }, "min_free_disk_bytes": 0 }"#,
        )
        .unwrap();

        let settings = EngineSettings::load_or_default(dir.path());
        assert_eq!(settings.registry.branch, "dev");
        assert_eq!(settings.registry.owner, "m5kro");
        assert_eq!(settings.min_free_disk_bytes, 0);
        assert_eq!(settings.progress_interval_ms, 250);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ nope").unwrap();
        assert_eq!(
            EngineSettings::load_or_default(dir.path()),
            EngineSettings::default()
        );
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = EngineSettings::default();
        settings.registry.owner = "someone".into();
        settings.save(dir.path()).unwrap();
        assert_eq!(EngineSettings::load_or_default(dir.path()), settings);
    }
}
