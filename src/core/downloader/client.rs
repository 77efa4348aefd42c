use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::progress::{ProgressEvent, ProgressSink, RateEstimator};
use crate::core::error::{ModuleError, ModuleResult};

/// Result of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub downloaded_bytes: u64,
    /// From `Content-Length`; `None` when the server did not announce one.
    pub total_bytes: Option<u64>,
}

/// Streaming HTTP downloader with progress events and cooperative cancellation.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    /// Minimum spacing between transfer-rate samples.
    progress_interval: Duration,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            progress_interval: Duration::from_millis(250),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Streams `url` into `dest`, creating parent directories as needed.
    ///
    /// The token is checked on entry and raced against every chunk read. On
    /// cancellation or a mid-stream failure the partial file is removed.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> ModuleResult<DownloadOutcome> {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ModuleError::io(parent, source))?;
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ModuleError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ModuleError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        progress.emit(ProgressEvent::TransferStarted {
            url: url.to_string(),
            total_bytes,
        });

        let result = self
            .stream_to_file(url, response, dest, total_bytes, progress, cancel)
            .await;

        match result {
            Ok(downloaded_bytes) => {
                progress.emit(ProgressEvent::TransferFinished {
                    url: url.to_string(),
                    downloaded_bytes,
                });
                debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, downloaded_bytes);
                Ok(DownloadOutcome {
                    downloaded_bytes,
                    total_bytes: total_bytes.or(Some(downloaded_bytes)),
                })
            }
            Err(err) => {
                if let Err(e) = tokio::fs::remove_file(dest).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {:?}: {}", dest, e);
                    }
                }
                Err(err)
            }
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        response: reqwest::Response,
        dest: &Path,
        total_bytes: Option<u64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> ModuleResult<u64> {
        // The handle lives only inside this function so it is closed before any cleanup.
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| ModuleError::io(dest, source))?;

        let mut stream = response.bytes_stream();
        let mut downloaded = 0_u64;
        let mut rate = RateEstimator::new(self.progress_interval, Instant::now());

        loop {
            if cancel.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(ModuleError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|source| ModuleError::io(dest, source))?;
            downloaded = downloaded.saturating_add(chunk.len() as u64);

            if let Some(bytes_per_sec) = rate.sample(downloaded, Instant::now()) {
                progress.emit(ProgressEvent::TransferProgress {
                    url: url.to_string(),
                    downloaded_bytes: downloaded,
                    total_bytes,
                    bytes_per_sec,
                });
            }
        }

        file.flush()
            .await
            .map_err(|source| ModuleError::io(dest, source))?;
        Ok(downloaded)
    }
}

/// Last path segment of a download link, used as the on-disk file name.
pub fn file_name_from_url(link: &str) -> ModuleResult<String> {
    let url = Url::parse(link)
        .map_err(|e| ModuleError::Other(format!("Invalid download link {link}: {e}")))?;
    let name = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        return Ok("download".to_string());
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(
            file_name_from_url("https://dl.nwjs.io/v0.101.0/nwjs-sdk-v0.101.0-osx-x64.zip")
                .unwrap(),
            "nwjs-sdk-v0.101.0-osx-x64.zip"
        );
        assert_eq!(
            file_name_from_url("https://example.com/files/Cheat_Menu.js?raw=1").unwrap(),
            "Cheat_Menu.js"
        );
        assert_eq!(
            file_name_from_url("https://example.com/").unwrap(),
            "download"
        );
        assert!(file_name_from_url("not a url").is_err());
    }

    #[tokio::test]
    async fn cancelled_before_start_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.zip");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let downloader = Downloader::new(Client::new());
        let err = downloader
            .download_file(
                "http://127.0.0.1:9/file.zip",
                &dest,
                &ProgressSink::disabled(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dest.exists());
    }
}
