use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the module engine.
/// Every component returns `Result<T, ModuleError>`.
#[derive(Debug, Error)]
pub enum ModuleError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Registry listing failed for {dir}: HTTP {status}")]
    RegistryListing { dir: String, status: u16 },

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    // ── Cancellation ────────────────────────────────────
    #[error("Operation aborted")]
    Cancelled,

    // ── Malformed data ──────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Unsupported archive type: {0:?}")]
    UnsupportedArchive(PathBuf),

    #[error("Invalid manifest for module {folder}: {reason}")]
    InvalidManifest { folder: String, reason: String },

    // ── Integrity / resolution ──────────────────────────
    #[error("No build for \"{dependency}\" matching arch \"{arch}\"")]
    MissingBuild { dependency: String, arch: String },

    #[error("manifest.json not found for module {0}")]
    ManifestNotFound(String),

    #[error("Invalid module folder name: {0:?}")]
    InvalidFolder(String),

    #[error("Module not installed: {0}")]
    ModuleNotInstalled(String),

    #[error("No launcher registered for module {0}")]
    MissingLauncher(String),

    #[error("Module {folder} does not declare multi-version argument {arg}")]
    NotMultiVersion { folder: String, arg: String },

    #[error("Version {version} not offered by module {folder}")]
    UnknownVersion { folder: String, version: String },

    // ── Hooks ───────────────────────────────────────────
    #[error("{hook} hook failed for module {folder}: {message}")]
    Hook {
        folder: String,
        hook: &'static str,
        message: String,
    },

    // ── Disk ────────────────────────────────────────────
    #[error("Insufficient disk space: available={available} required={required}")]
    InsufficientDiskSpace { available: u64, required: u64 },

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type ModuleResult<T> = Result<T, ModuleError>;

impl ModuleError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModuleError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error stems from user cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ModuleError::Cancelled)
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(source: std::io::Error) -> Self {
        ModuleError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for UI bridges ────────────────────────
// Frontends receive the error as its display string.
impl serde::Serialize for ModuleError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_build_names_dependency_and_arch() {
        let err = ModuleError::MissingBuild {
            dependency: "nwjs".into(),
            arch: "arm64".into(),
        };
        let message = err.to_string();
        assert!(message.contains("nwjs"));
        assert!(message.contains("arm64"));
    }

    #[test]
    fn cancelled_is_distinguished() {
        assert!(ModuleError::Cancelled.is_cancelled());
        assert!(!ModuleError::Other("boom".into()).is_cancelled());
    }

    #[test]
    fn serializes_as_display_string() {
        let json = serde_json::to_string(&ModuleError::ModuleNotInstalled("nwjs".into())).unwrap();
        assert_eq!(json, "\"Module not installed: nwjs\"");
    }
}
