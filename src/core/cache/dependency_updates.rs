use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use super::disk::{read_json, write_json_atomic};
use crate::core::error::ModuleResult;

pub const DEPENDENCY_UPDATES_FILE: &str = "dependency_updates.json";
pub const DEPENDENCY_UPDATES_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyUpdateSnapshot {
    pub schema: u32,
    pub fetched_at: i64,
    pub updates_by_folder: BTreeMap<String, bool>,
}

/// "Has dependency update" flags per module folder. Refreshes merge into the existing
/// flags; folders outside a refresh keep their last value.
#[derive(Debug)]
pub struct DependencyUpdateCache {
    path: PathBuf,
    state: Mutex<Option<DependencyUpdateSnapshot>>,
}

impl DependencyUpdateCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(DEPENDENCY_UPDATES_FILE),
            state: Mutex::new(None),
        }
    }

    async fn load_from_disk(&self) -> DependencyUpdateSnapshot {
        match read_json::<DependencyUpdateSnapshot>(&self.path).await {
            Some(snapshot) if snapshot.schema == DEPENDENCY_UPDATES_SCHEMA => snapshot,
            Some(snapshot) => {
                warn!(
                    "Discarding dependency update cache with schema {}",
                    snapshot.schema
                );
                DependencyUpdateSnapshot::default()
            }
            None => DependencyUpdateSnapshot::default(),
        }
    }

    pub async fn snapshot(&self) -> DependencyUpdateSnapshot {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.load_from_disk().await);
        }
        state.clone().unwrap_or_default()
    }

    pub async fn get(&self, folder: &str) -> Option<bool> {
        self.snapshot().await.updates_by_folder.get(folder).copied()
    }

    /// Merges `flags` into the cache and persists it.
    pub async fn merge(&self, flags: BTreeMap<String, bool>) -> ModuleResult<()> {
        let mut state = self.state.lock().await;
        let mut snapshot = match state.take() {
            Some(snapshot) => snapshot,
            None => self.load_from_disk().await,
        };
        snapshot.schema = DEPENDENCY_UPDATES_SCHEMA;
        snapshot.fetched_at = Utc::now().timestamp();
        snapshot.updates_by_folder.extend(flags);

        let result = write_json_atomic(&self.path, &snapshot).await;
        *state = Some(snapshot);
        result
    }

    /// Marks a folder as up to date.
    pub async fn clear(&self, folder: &str) -> ModuleResult<()> {
        let mut flags = BTreeMap::new();
        flags.insert(folder.to_string(), false);
        self.merge(flags).await
    }

    /// Forgets a folder entirely, e.g. after uninstall.
    pub async fn forget(&self, folder: &str) -> ModuleResult<()> {
        let mut state = self.state.lock().await;
        let mut snapshot = match state.take() {
            Some(snapshot) => snapshot,
            None => self.load_from_disk().await,
        };
        let removed = snapshot.updates_by_folder.remove(folder).is_some();
        let result = if removed {
            snapshot.schema = DEPENDENCY_UPDATES_SCHEMA;
            write_json_atomic(&self.path, &snapshot).await
        } else {
            Ok(())
        };
        *state = Some(snapshot);
        result
    }
}
