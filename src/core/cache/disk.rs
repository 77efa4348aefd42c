use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::core::error::{ModuleError, ModuleResult};

/// Writes `value` as pretty JSON through a temp file in the same directory, then renames
/// it over `path`.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> ModuleResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ModuleError::Other(format!("No parent directory for {path:?}")))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| ModuleError::io(parent, source))?;

    let payload = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "cache".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    tokio::fs::write(&temp_path, payload)
        .await
        .map_err(|source| ModuleError::io(&temp_path, source))?;
    if let Err(source) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(ModuleError::io(path, source));
    }
    Ok(())
}

/// Reads a JSON cache file. Missing files yield `None`; unparsable ones are logged and
/// also yield `None`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unreadable cache {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let mut value = HashMap::new();
        value.insert("nwjs".to_string(), true);

        write_json_atomic(&path, &value).await.unwrap();
        write_json_atomic(&path, &value).await.unwrap();

        let read: HashMap<String, bool> = read_json(&path).await.unwrap();
        assert_eq!(read, value);
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn garbage_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "garbage").unwrap();
        assert!(read_json::<HashMap<String, bool>>(&path).await.is_none());
        assert!(read_json::<HashMap<String, bool>>(&dir.path().join("absent.json"))
            .await
            .is_none());
    }
}
