// ─── Remote manifest cache ───
// Process-wide cache of the registry's manifest list, mirrored to disk so a failed
// refresh can fall back to the last snapshot.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::disk::{read_json, write_json_atomic};
use crate::core::error::{ModuleError, ModuleResult};
use crate::core::manifest::{ManifestSummary, RegistryClient};

pub const REMOTE_MANIFESTS_FILE: &str = "remote_manifests.json";
pub const REMOTE_MANIFESTS_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteManifestSnapshot {
    pub schema: u32,
    pub repo_key: String,
    pub fetched_at: i64,
    pub manifests: Vec<ManifestSummary>,
}

impl RemoteManifestSnapshot {
    fn matches(&self, repo_key: &str) -> bool {
        self.schema == REMOTE_MANIFESTS_SCHEMA && self.repo_key == repo_key
    }

    fn is_fresh(&self, ttl_secs: i64) -> bool {
        Utc::now().timestamp().saturating_sub(self.fetched_at) <= ttl_secs
    }
}

#[derive(Debug, Default)]
struct MemState {
    snapshot: Option<RemoteManifestSnapshot>,
    /// Bumped every time `snapshot` is replaced.
    generation: u64,
    /// Bumped after every registry fetch, successful or not.
    attempts: u64,
    /// Error of the latest fetch when it failed without a fallback.
    last_error: Option<String>,
}

/// Populate-on-miss, invalidate-on-force-refresh cache with single-flight refresh:
/// concurrent callers wait for the refresh already in progress instead of issuing
/// their own.
#[derive(Debug)]
pub struct RemoteManifestCache {
    path: PathBuf,
    ttl_secs: i64,
    mem: Mutex<MemState>,
    refresh: tokio::sync::Mutex<()>,
}

impl RemoteManifestCache {
    pub fn new(cache_dir: PathBuf, ttl_secs: i64) -> Self {
        Self {
            path: cache_dir.join(REMOTE_MANIFESTS_FILE),
            ttl_secs,
            mem: Mutex::new(MemState::default()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_mem(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.mem.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, snapshot: RemoteManifestSnapshot) {
        let mut mem = self.lock_mem();
        mem.snapshot = Some(snapshot);
        mem.generation += 1;
    }

    fn record_attempt(&self, error: Option<String>) {
        let mut mem = self.lock_mem();
        mem.attempts += 1;
        mem.last_error = error;
    }

    /// Drops the in-memory copy; the disk snapshot stays as a fallback.
    pub fn invalidate(&self) {
        let mut mem = self.lock_mem();
        mem.snapshot = None;
        mem.generation += 1;
    }

    /// Cached manifests for the registry, refreshing when missing, stale or forced.
    pub async fn get(
        &self,
        registry: &RegistryClient,
        force_refresh: bool,
    ) -> ModuleResult<Vec<ManifestSummary>> {
        let repo_key = registry.repo_key();
        let (observed, observed_attempts) = {
            let mem = self.lock_mem();
            if !force_refresh {
                if let Some(snapshot) = mem.snapshot.as_ref() {
                    if snapshot.matches(&repo_key) && snapshot.is_fresh(self.ttl_secs) {
                        return Ok(snapshot.manifests.clone());
                    }
                }
            }
            (mem.generation, mem.attempts)
        };

        let _refresh = self.refresh.lock().await;

        // Another caller refreshed while we were waiting: share its result.
        {
            let mem = self.lock_mem();
            if mem.generation != observed {
                if let Some(snapshot) = mem.snapshot.as_ref() {
                    if snapshot.matches(&repo_key) {
                        debug!("Joined in-flight manifest refresh for {}", repo_key);
                        return Ok(snapshot.manifests.clone());
                    }
                }
            }
            // It failed: report that instead of hitting the registry again.
            if mem.attempts != observed_attempts {
                if let Some(message) = mem.last_error.as_ref() {
                    debug!("Joined failed manifest refresh for {}", repo_key);
                    return Err(ModuleError::RegistryUnavailable(message.clone()));
                }
            }
        }

        if !force_refresh {
            if let Some(snapshot) = self.load_disk(&repo_key).await {
                if snapshot.is_fresh(self.ttl_secs) {
                    debug!("Using on-disk manifest snapshot for {}", repo_key);
                    let manifests = snapshot.manifests.clone();
                    self.store(snapshot);
                    return Ok(manifests);
                }
            }
        }

        match registry.fetch_remote_manifests().await {
            Ok(manifests) => {
                let snapshot = RemoteManifestSnapshot {
                    schema: REMOTE_MANIFESTS_SCHEMA,
                    repo_key: repo_key.clone(),
                    fetched_at: Utc::now().timestamp(),
                    manifests: manifests.clone(),
                };
                if let Err(e) = write_json_atomic(&self.path, &snapshot).await {
                    warn!("Failed to persist manifest snapshot: {}", e);
                }
                self.store(snapshot);
                self.record_attempt(None);
                info!("Refreshed {} manifests for {}", manifests.len(), repo_key);
                Ok(manifests)
            }
            Err(err) => match self.load_disk(&repo_key).await {
                Some(snapshot) => {
                    warn!(
                        "Manifest refresh failed, using snapshot from {}: {}",
                        snapshot.fetched_at, err
                    );
                    let manifests = snapshot.manifests.clone();
                    self.store(snapshot);
                    self.record_attempt(None);
                    Ok(manifests)
                }
                None => {
                    self.record_attempt(Some(err.to_string()));
                    Err(err)
                }
            },
        }
    }

    async fn load_disk(&self, repo_key: &str) -> Option<RemoteManifestSnapshot> {
        let snapshot: RemoteManifestSnapshot = read_json(&self.path).await?;
        if snapshot.matches(repo_key) {
            Some(snapshot)
        } else {
            debug!(
                "Discarding manifest snapshot for {} (schema {})",
                snapshot.repo_key, snapshot.schema
            );
            None
        }
    }
}
