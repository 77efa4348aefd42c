use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::downloader::{ProgressEvent, ProgressSink};
use crate::core::error::ModuleResult;
use crate::core::manifest::ManifestSummary;
use crate::core::state::EngineState;

/// Installs, updates and inspects engine modules.
#[derive(Debug, Parser)]
#[command(name = "engine-modules", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to $ENGINE_MODULES_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List installed modules and whether an update is available
    List,
    /// List modules offered by the registry
    Available {
        /// Ignore the cached list
        #[arg(long)]
        refresh: bool,
    },
    /// Install a module from the registry
    Install { folder: String },
    /// Remove an installed module
    Uninstall { folder: String },
    /// Reinstall a module, keeping installed runtime versions
    Update { folder: String },
    /// Check modules for dependency updates (all installed when none given)
    DepsCheck { folders: Vec<String> },
    /// Download the dependency updates of a module
    DepsUpdate { folder: String },
    /// Find the module that runs a game
    Detect { path: PathBuf },
}

#[derive(Debug, Serialize)]
struct InstalledModule {
    folder: String,
    name: String,
    version: String,
    update_available: bool,
    dependency_update: bool,
}

/// Runs one CLI command and prints its result as JSON on stdout.
pub async fn execute(
    state: &EngineState,
    command: Command,
    cancel: CancellationToken,
) -> ModuleResult<()> {
    let (progress, rx) = ProgressSink::channel();
    let printer = tokio::spawn(log_progress(rx));
    let manager = state.manager.clone();

    let output = match command {
        Command::List => {
            let updates = match manager.check_module_updates(false).await {
                Ok(updates) => updates,
                Err(e) => {
                    info!("Registry unavailable, skipping update check: {}", e);
                    BTreeMap::new()
                }
            };
            let dep_updates = manager.cached_dependency_updates().await;
            let modules: Vec<InstalledModule> = manager
                .read_local_manifests()
                .await
                .into_iter()
                .map(|(folder, manifest)| InstalledModule {
                    name: manifest.display_name(&folder),
                    version: manifest.version_or_unknown().to_string(),
                    update_available: updates.get(&folder).copied().unwrap_or(false),
                    dependency_update: dep_updates.get(&folder).copied().unwrap_or(false),
                    folder,
                })
                .collect();
            serde_json::to_value(modules)?
        }
        Command::Available { refresh } => {
            let installed = manager.list_installed().await;
            let manifests: Vec<ManifestSummary> = manager
                .fetch_remote_manifests(refresh)
                .await?
                .into_iter()
                .filter(|m| !installed.contains(&m.folder))
                .collect();
            serde_json::to_value(manifests)?
        }
        Command::Install { folder } => {
            serde_json::to_value(manager.install(&folder, &progress, &cancel).await?)?
        }
        Command::Uninstall { folder } => {
            manager.uninstall(&folder).await?;
            serde_json::json!({ "uninstalled": folder })
        }
        Command::Update { folder } => {
            serde_json::to_value(manager.update(&folder, &progress, &cancel).await?)?
        }
        Command::DepsCheck { folders } => {
            serde_json::to_value(manager.check_dependency_updates(&folders).await?)?
        }
        Command::DepsUpdate { folder } => serde_json::to_value(
            manager
                .apply_dependency_updates(&folder, &progress, &cancel)
                .await?,
        )?,
        Command::Detect { path } => serde_json::to_value(manager.detect_engine(&path).await?)?,
    };

    drop(progress);
    let _ = printer.await;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn log_progress(mut rx: UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Step {
                folder,
                phase,
                step,
                total,
                message,
            } => info!("[{}] {}/{} {:?}: {}", folder, step, total, phase, message),
            ProgressEvent::TransferStarted { url, total_bytes } => {
                debug!("GET {} ({:?} bytes)", url, total_bytes)
            }
            ProgressEvent::TransferProgress {
                downloaded_bytes,
                total_bytes,
                bytes_per_sec,
                ..
            } => match total_bytes {
                Some(total) if total > 0 => info!(
                    "{:.1}% ({:.1} KiB/s)",
                    downloaded_bytes as f64 * 100.0 / total as f64,
                    bytes_per_sec / 1024.0
                ),
                _ => info!(
                    "{} bytes ({:.1} KiB/s)",
                    downloaded_bytes,
                    bytes_per_sec / 1024.0
                ),
            },
            ProgressEvent::TransferFinished {
                url,
                downloaded_bytes,
            } => debug!("Finished {} ({} bytes)", url, downloaded_bytes),
        }
    }
}
