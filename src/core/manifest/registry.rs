// ─── Module registry ───
// GitHub-style contents API: `GET {api}/{dir}?ref={branch}` lists a directory,
// `GET {raw}/{path}` returns file bytes.

use std::path::{Path, PathBuf};

use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::model::{ManifestSummary, MANIFEST_FILE};
use crate::core::archive::is_single_segment;
use crate::core::error::{ModuleError, ModuleResult};
use crate::core::state::RegistrySettings;

/// Parallel manifest fetches when listing the registry.
const MANIFEST_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Dir,
    File,
    #[serde(other)]
    Other,
}

/// One entry of a contents API listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    settings: RegistrySettings,
}

impl RegistryClient {
    pub fn new(client: Client, settings: RegistrySettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn repo_key(&self) -> String {
        self.settings.repo_key()
    }

    /// Registry path of a module folder, e.g. `modules/nwjs`.
    pub fn module_path(&self, folder: &str) -> String {
        format!(
            "{}/{}",
            self.settings.modules_path.trim_matches('/'),
            folder
        )
    }

    /// Lists one registry directory.
    pub async fn list_dir(&self, dir: &str) -> ModuleResult<Vec<ContentItem>> {
        let url = format!(
            "{}/{}?ref={}",
            self.settings.api_base().trim_end_matches('/'),
            dir.trim_matches('/'),
            self.settings.branch
        );
        debug!("Listing registry dir {}", url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ModuleError::RegistryListing {
                dir: dir.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Fetches raw file bytes from the registry.
    pub async fn fetch_raw(&self, path: &str) -> ModuleResult<Vec<u8>> {
        let url = format!(
            "{}/{}",
            self.settings.raw_base().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ModuleError::DownloadFailed {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetches one remote manifest. Never fails: on any error the summary is degraded
    /// (`version = "N/A"`, empty `raw`).
    pub async fn fetch_remote_manifest(&self, folder: &str) -> ManifestSummary {
        let path = format!("{}/{}", self.module_path(folder), MANIFEST_FILE);
        let bytes = match self.fetch_raw(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Remote manifest for {} unavailable: {}", folder, e);
                return ManifestSummary::degraded(folder);
            }
        };
        match serde_json::from_slice::<Map<String, Value>>(&bytes) {
            Ok(raw) => ManifestSummary::from_manifest(folder, raw),
            Err(e) => {
                warn!("Remote manifest for {} is not a JSON object: {}", folder, e);
                ManifestSummary::degraded(folder)
            }
        }
    }

    /// Lists module folders in the registry and fetches each manifest concurrently.
    /// Listing failures propagate; individual manifest failures degrade.
    #[instrument(skip(self), fields(repo = %self.repo_key()))]
    pub async fn fetch_remote_manifests(&self) -> ModuleResult<Vec<ManifestSummary>> {
        let items = self.list_dir(&self.settings.modules_path).await?;
        let folders: Vec<String> = items
            .into_iter()
            .filter(|item| item.kind == ContentKind::Dir)
            .filter(|item| {
                let ok = is_single_segment(&item.name);
                if !ok {
                    warn!("Skipping unsafe module folder {:?}", item.name);
                }
                ok
            })
            .map(|item| item.name)
            .collect();

        let mut summaries: Vec<ManifestSummary> = stream::iter(folders)
            .map(|folder| async move { self.fetch_remote_manifest(&folder).await })
            .buffer_unordered(MANIFEST_FETCH_CONCURRENCY)
            .collect()
            .await;
        summaries.sort_by(|a, b| a.folder.cmp(&b.folder));

        info!("Loaded {} remote module manifests", summaries.len());
        Ok(summaries)
    }

    /// Mirrors a registry directory tree to `local_dir`. Files whose raw fetch is
    /// rejected by the server are skipped; listing failures abort the mirror.
    pub async fn download_directory(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        cancel: &CancellationToken,
    ) -> ModuleResult<usize> {
        let mut pending: Vec<(String, PathBuf)> =
            vec![(remote_dir.trim_matches('/').to_string(), local_dir.to_path_buf())];
        let mut written = 0_usize;

        while let Some((dir, local)) = pending.pop() {
            if cancel.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            tokio::fs::create_dir_all(&local)
                .await
                .map_err(|source| ModuleError::io(&local, source))?;

            let items = tokio::select! {
                _ = cancel.cancelled() => return Err(ModuleError::Cancelled),
                items = self.list_dir(&dir) => items?,
            };

            for item in items {
                if !is_single_segment(&item.name) {
                    warn!("Skipping unsafe registry entry {:?} in {}", item.name, dir);
                    continue;
                }
                let remote_path = format!("{}/{}", dir, item.name);
                let local_path = local.join(&item.name);
                match item.kind {
                    ContentKind::Dir => pending.push((remote_path, local_path)),
                    ContentKind::File => {
                        let fetched = tokio::select! {
                            _ = cancel.cancelled() => return Err(ModuleError::Cancelled),
                            fetched = self.fetch_raw(&remote_path) => fetched,
                        };
                        let bytes = match fetched {
                            Ok(bytes) => bytes,
                            Err(ModuleError::DownloadFailed { url, status }) => {
                                warn!("Skipping {} (HTTP {})", url, status);
                                continue;
                            }
                            Err(e) => return Err(e),
                        };
                        tokio::fs::write(&local_path, bytes)
                            .await
                            .map_err(|source| ModuleError::io(&local_path, source))?;
                        written += 1;
                    }
                    ContentKind::Other => debug!("Ignoring registry entry {}", remote_path),
                }
            }
        }

        Ok(written)
    }
}
