// ─── Module Manager ───
// Orchestrates install, uninstall, preserving update and dependency updates as
// cancellable, progress-reporting jobs. Jobs on one module folder are serialized;
// jobs on different folders run independently.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::game_args::reconcile_game_args;
use super::preserve::UpdateStash;
use crate::core::archive::is_single_segment;
use crate::core::cache::{DependencyUpdateCache, RemoteManifestCache};
use crate::core::deps::{
    check_dependency_names, normalize_tree, DependencyInstaller, InstalledDependency, DEPS_DIR,
};
use crate::core::detect::{detect, AutodetectRule, Detection};
use crate::core::downloader::{Phase, ProgressSink, StepTracker};
use crate::core::error::{ModuleError, ModuleResult};
use crate::core::hooks::{GameRef, HookContext, HookRegistry, LaunchRequest, ModuleHooks, UiHandle};
use crate::core::manifest::{
    compare_versions, has_update, AutodetectBlock, BuildSpecByArch, DependencyMap,
    validate_folder, ManifestSummary, ModuleManifest, ModuleStore, RegistryClient,
};

/// What an install job produced.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub folder: String,
    pub files: usize,
    pub dependencies: Vec<InstalledDependency>,
}

/// What a preserving update produced.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub folder: String,
    pub install: InstallReport,
    /// Multi-version key → version folders carried over from the previous install.
    pub preserved: BTreeMap<String, Vec<String>>,
    /// Stashed keys the new manifest no longer declares as multi-version.
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyUpdateReport {
    pub folder: String,
    pub updated: Vec<String>,
}

/// An autodetect hit, local or from the registry.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMatch {
    pub detection: Detection,
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// The launcher ran. `updated_args` is set when the saved arguments had to be
    /// reconciled and should be persisted by the caller.
    Launched {
        updated_args: Option<Map<String, Value>>,
    },
    /// The module was missing and the user chose not to install it.
    Declined,
}

/// Paths and collaborators a [`ModuleManager`] is built from.
pub struct ManagerParts {
    pub store: ModuleStore,
    pub registry: RegistryClient,
    pub installer: DependencyInstaller,
    pub cache_dir: PathBuf,
    pub remote_cache_ttl_secs: i64,
    pub hooks: HookRegistry,
}

pub struct ModuleManager {
    store: ModuleStore,
    registry: RegistryClient,
    installer: DependencyInstaller,
    remote_cache: RemoteManifestCache,
    dep_updates: DependencyUpdateCache,
    hooks: HookRegistry,
    stash_root: PathBuf,
    job_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ModuleManager {
    pub fn new(parts: ManagerParts) -> Self {
        Self {
            remote_cache: RemoteManifestCache::new(
                parts.cache_dir.clone(),
                parts.remote_cache_ttl_secs,
            ),
            dep_updates: DependencyUpdateCache::new(parts.cache_dir.clone()),
            stash_root: parts.cache_dir.join("stash"),
            store: parts.store,
            registry: parts.registry,
            installer: parts.installer,
            hooks: parts.hooks,
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ModuleStore {
        &self.store
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn stash_root(&self) -> &Path {
        &self.stash_root
    }

    fn job_lock(&self, folder: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .job_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(folder.to_string()).or_default().clone()
    }

    fn hook_context<'a>(&'a self, folder: &'a str, module_dir: &'a Path) -> HookContext<'a> {
        HookContext {
            folder,
            module_dir,
            http_client: self.installer.downloader().client(),
        }
    }

    fn module_hooks(&self, folder: &str) -> Option<Arc<dyn ModuleHooks>> {
        self.hooks.get(folder)
    }

    // ── Manifests ───────────────────────────────────────

    pub async fn list_installed(&self) -> BTreeSet<String> {
        self.store.list_installed().await
    }

    pub async fn read_local_manifests(&self) -> BTreeMap<String, ModuleManifest> {
        self.store.read_local_manifests().await
    }

    pub async fn fetch_remote_manifest(&self, folder: &str) -> ManifestSummary {
        self.registry.fetch_remote_manifest(folder).await
    }

    /// Registry manifest list through the process-wide cache.
    pub async fn fetch_remote_manifests(
        &self,
        force_refresh: bool,
    ) -> ModuleResult<Vec<ManifestSummary>> {
        self.remote_cache.get(&self.registry, force_refresh).await
    }

    /// Whether the registry has a newer version of an installed module.
    pub async fn module_update_available(&self, folder: &str) -> ModuleResult<bool> {
        validate_folder(folder)?;
        let local = match self.store.read_manifest(folder).await {
            Ok(manifest) => manifest,
            Err(ModuleError::ManifestNotFound(_)) => {
                return Err(ModuleError::ModuleNotInstalled(folder.to_string()))
            }
            Err(e) => return Err(e),
        };
        let remote = match self
            .fetch_remote_manifests(false)
            .await?
            .into_iter()
            .find(|m| m.folder == folder)
        {
            Some(summary) => summary,
            None => self.fetch_remote_manifest(folder).await,
        };
        Ok(has_update(local.version.as_deref(), Some(remote.version.as_str())))
    }

    /// Update availability for every installed module against the cached registry list.
    pub async fn check_module_updates(
        &self,
        force_refresh: bool,
    ) -> ModuleResult<BTreeMap<String, bool>> {
        let remote: HashMap<String, ManifestSummary> = self
            .fetch_remote_manifests(force_refresh)
            .await?
            .into_iter()
            .map(|m| (m.folder.clone(), m))
            .collect();
        Ok(self
            .read_local_manifests()
            .await
            .into_iter()
            .map(|(folder, local)| {
                let remote_version = remote.get(&folder).map(|m| m.version.as_str());
                let update = has_update(local.version.as_deref(), remote_version);
                (folder, update)
            })
            .collect())
    }

    // ── Install / uninstall ─────────────────────────────

    /// Installs `folder` from the registry, replacing any previous copy. On failure or
    /// cancellation the partial module is removed.
    #[instrument(skip(self, progress, cancel))]
    pub async fn install(
        &self,
        folder: &str,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> ModuleResult<InstallReport> {
        validate_folder(folder)?;
        let lock = self.job_lock(folder);
        let _job = lock.lock().await;

        let mut steps = StepTracker::new(progress.clone(), folder, 1);
        let report = self.install_locked(folder, &mut steps, 1, cancel).await?;
        steps.begin(Phase::Finalizing, format!("Installed {folder}"));
        Ok(report)
    }

    /// `trailing` is the number of steps the caller still runs after the install.
    async fn install_locked(
        &self,
        folder: &str,
        steps: &mut StepTracker,
        trailing: usize,
        cancel: &CancellationToken,
    ) -> ModuleResult<InstallReport> {
        let remote_estimate = self
            .fetch_remote_manifest(folder)
            .await
            .manifest()
            .map(|m| self.installer.estimate_steps(&m.dependencies))
            .unwrap_or(0);
        steps.set_remaining(1 + remote_estimate + trailing);

        let result = self.install_steps(folder, steps, trailing, cancel).await;
        if let Err(e) = &result {
            if e.is_cancelled() {
                info!("Install of {} cancelled, removing partial module", folder);
            } else {
                warn!("Install of {} failed, removing partial module: {}", folder, e);
            }
            if let Err(cleanup) = self.store.remove_module(folder).await {
                warn!("Could not remove partial module {}: {}", folder, cleanup);
            }
        }
        result
    }

    async fn install_steps(
        &self,
        folder: &str,
        steps: &mut StepTracker,
        trailing: usize,
        cancel: &CancellationToken,
    ) -> ModuleResult<InstallReport> {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        self.store.remove_module(folder).await?;
        let module_dir = self.store.module_dir(folder);

        steps.begin(Phase::Listing, format!("Downloading {folder} files"));
        let files = self
            .registry
            .download_directory(&self.registry.module_path(folder), &module_dir, cancel)
            .await?;

        let manifest = self.store.read_manifest(folder).await?;
        steps.set_remaining(self.installer.estimate_steps(&manifest.dependencies) + trailing);

        let dependencies = self
            .installer
            .install_dependencies(&module_dir, &manifest.dependencies, steps, cancel)
            .await?;

        info!(
            "Installed {} ({} files, {} dependencies)",
            folder,
            files,
            dependencies.len()
        );
        Ok(InstallReport {
            folder: folder.to_string(),
            files,
            dependencies,
        })
    }

    /// Removes an installed module. Removing a missing module succeeds.
    pub async fn uninstall(&self, folder: &str) -> ModuleResult<()> {
        validate_folder(folder)?;
        let lock = self.job_lock(folder);
        let _job = lock.lock().await;

        self.store.remove_module(folder).await?;
        if let Err(e) = self.dep_updates.forget(folder).await {
            warn!("Could not drop dependency update flag for {}: {}", folder, e);
        }
        info!("Uninstalled {}", folder);
        Ok(())
    }

    // ── Preserving update ───────────────────────────────

    /// Reinstalls `folder` from the registry, carrying over every installed version
    /// of its multi-version arguments. On failure or cancellation the previous install
    /// is put back.
    #[instrument(skip(self, progress, cancel))]
    pub async fn update(
        &self,
        folder: &str,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> ModuleResult<UpdateReport> {
        validate_folder(folder)?;
        let lock = self.job_lock(folder);
        let _job = lock.lock().await;

        if !self.store.is_installed(folder).await {
            return Err(ModuleError::ModuleNotInstalled(folder.to_string()));
        }
        let module_dir = self.store.module_dir(folder);
        let deps_dir = self.store.deps_dir(folder);

        let keys: Vec<String> = match self.store.read_manifest(folder).await {
            Ok(current) => current
                .multi_version_args()
                .into_iter()
                .filter(|key| is_single_segment(key) && deps_dir.join(key).is_dir())
                .collect(),
            Err(e) => {
                warn!("Updating {} without a readable manifest: {}", folder, e);
                Vec::new()
            }
        };

        let mut steps = StepTracker::new(progress.clone(), folder, 4);
        let mut stash = UpdateStash::create(&self.stash_root).await?;

        let result = self
            .update_steps(folder, &module_dir, &deps_dir, &keys, &mut stash, &mut steps, cancel)
            .await;

        match result {
            Ok(report) => {
                stash.discard().await;
                if let Err(e) = self.dep_updates.clear(folder).await {
                    warn!("Could not clear dependency update flag for {}: {}", folder, e);
                }
                steps.begin(Phase::Finalizing, format!("Updated {folder}"));
                Ok(report)
            }
            Err(e) => {
                steps.begin(Phase::Restoring, format!("Restoring previous {folder}"));
                if let Err(restore) = stash.restore(&module_dir, DEPS_DIR).await {
                    warn!(
                        "Could not restore {} (stash kept at {:?}): {}",
                        folder,
                        stash.dir(),
                        restore
                    );
                    return Err(e);
                }
                stash.discard().await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_steps(
        &self,
        folder: &str,
        module_dir: &Path,
        deps_dir: &Path,
        keys: &[String],
        stash: &mut UpdateStash,
        steps: &mut StepTracker,
        cancel: &CancellationToken,
    ) -> ModuleResult<UpdateReport> {
        steps.begin(Phase::Cleaning, "Stashing installed versions");
        for key in keys {
            if cancel.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            stash.stash_key(deps_dir, key).await?;
            debug!("Stashed {}/deps/{}", folder, key);
        }
        stash.back_up_module(module_dir).await?;

        let install = self.install_locked(folder, steps, 2, cancel).await?;
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }

        steps.begin(Phase::Restoring, "Restoring installed versions");
        let manifest = self.store.read_manifest(folder).await?;
        let mut preserved = BTreeMap::new();
        let mut dropped = Vec::new();
        for key in stash.keys() {
            if manifest.is_multi_version_arg(key) {
                let moved = stash.merge_key_into(key, &deps_dir.join(key)).await?;
                preserved.insert(key.clone(), moved);
            } else {
                info!("{} no longer declares {} as multi-version, dropping it", folder, key);
                dropped.push(key.clone());
            }
        }
        normalize_tree(deps_dir).await;

        Ok(UpdateReport {
            folder: folder.to_string(),
            install,
            preserved,
            dropped,
        })
    }

    // ── Dependency updates ──────────────────────────────

    /// Dependencies the module's update checker reports as outdated. Modules without
    /// `updates: true` or without a checker have none.
    pub async fn pending_dependency_updates(&self, folder: &str) -> ModuleResult<DependencyMap> {
        validate_folder(folder)?;
        let manifest = self.store.read_manifest(folder).await?;
        if !manifest.updates {
            return Ok(DependencyMap::new());
        }
        let Some(hooks) = self.module_hooks(folder) else {
            return Ok(DependencyMap::new());
        };
        let Some(checker) = hooks.update_checker() else {
            return Ok(DependencyMap::new());
        };
        let module_dir = self.store.module_dir(folder);
        let pending = checker
            .check_updates(&self.hook_context(folder, &module_dir))
            .await
            .map_err(|e| hook_error(folder, "updates", e))?;
        check_dependency_names(folder, &pending)?;
        Ok(pending)
    }

    /// Refreshes the "has dependency update" flag for `folders` (all installed when
    /// empty) and merges the result into the flag cache.
    pub async fn check_dependency_updates(
        &self,
        folders: &[String],
    ) -> ModuleResult<BTreeMap<String, bool>> {
        let targets: Vec<String> = if folders.is_empty() {
            self.list_installed().await.into_iter().collect()
        } else {
            folders.to_vec()
        };

        let mut flags = BTreeMap::new();
        for folder in targets {
            match self.pending_dependency_updates(&folder).await {
                Ok(pending) => {
                    flags.insert(folder, !pending.is_empty());
                }
                Err(e) => warn!("Dependency update check failed for {}: {}", folder, e),
            }
        }
        self.dep_updates.merge(flags.clone()).await?;
        Ok(flags)
    }

    /// Last known "has dependency update" flags.
    pub async fn cached_dependency_updates(&self) -> BTreeMap<String, bool> {
        self.dep_updates.snapshot().await.updates_by_folder
    }

    /// Re-downloads every dependency the checker reports, then runs the post-update hook.
    #[instrument(skip(self, progress, cancel))]
    pub async fn apply_dependency_updates(
        &self,
        folder: &str,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> ModuleResult<DependencyUpdateReport> {
        validate_folder(folder)?;
        let lock = self.job_lock(folder);
        let _job = lock.lock().await;

        if !self.store.is_installed(folder).await {
            return Err(ModuleError::ModuleNotInstalled(folder.to_string()));
        }
        let updates = self.pending_dependency_updates(folder).await?;
        let module_dir = self.store.module_dir(folder);
        let deps_dir = self.store.deps_dir(folder);

        let mut steps = StepTracker::new(
            progress.clone(),
            folder,
            self.installer.estimate_steps(&updates) + 1,
        );
        let mut stash = UpdateStash::create(&self.stash_root).await?;
        let mut updated = Vec::with_capacity(updates.len());
        let mut attempted = Vec::with_capacity(updates.len());
        let result = self
            .replace_dependencies(
                &updates,
                &deps_dir,
                &mut stash,
                &mut attempted,
                &mut updated,
                &mut steps,
                cancel,
            )
            .await;
        if let Err(e) = result {
            steps.begin(Phase::Restoring, "Restoring previous dependencies");
            for name in attempted.iter().filter(|name| !stash.keys().contains(*name)) {
                let fresh = deps_dir.join(name);
                if let Err(cleanup) = tokio::fs::remove_dir_all(&fresh).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial {:?}: {}", fresh, cleanup);
                    }
                }
            }
            match stash.put_back_keys(&deps_dir).await {
                Ok(()) => stash.discard().await,
                Err(restore) => warn!(
                    "Could not restore dependencies of {} (stash kept at {:?}): {}",
                    folder,
                    stash.dir(),
                    restore
                ),
            }
            return Err(e);
        }
        stash.discard().await;

        if !updated.is_empty() {
            if let Some(hooks) = self.module_hooks(folder) {
                if let Some(post) = hooks.post_update() {
                    let ctx = self.hook_context(folder, &module_dir);
                    if let Err(e) = post.post_update(&ctx, &updated).await {
                        warn!("postupdate hook for {} failed: {}", folder, e);
                    }
                }
            }
        }

        steps.begin(Phase::Finalizing, "Fixing permissions");
        normalize_tree(&deps_dir).await;
        self.dep_updates.clear(folder).await?;

        info!("Updated {} dependencies of {}", updated.len(), folder);
        Ok(DependencyUpdateReport {
            folder: folder.to_string(),
            updated,
        })
    }

    /// Swaps each dependency for its new build, keeping the old copy in `stash` until
    /// the whole set succeeded.
    #[allow(clippy::too_many_arguments)]
    async fn replace_dependencies(
        &self,
        updates: &DependencyMap,
        deps_dir: &Path,
        stash: &mut UpdateStash,
        attempted: &mut Vec<String>,
        updated: &mut Vec<String>,
        steps: &mut StepTracker,
        cancel: &CancellationToken,
    ) -> ModuleResult<()> {
        for (name, builds) in updates {
            if cancel.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            let target = deps_dir.join(name);
            if tokio::fs::symlink_metadata(&target).await.is_ok() {
                stash.stash_key(deps_dir, name).await?;
            }
            attempted.push(name.clone());
            self.installer
                .install_one(name, builds, &target, steps, cancel)
                .await?;
            updated.push(name.clone());
        }
        Ok(())
    }

    // ── Autodetect ──────────────────────────────────────

    /// Detection rules of installed modules that declare an `autodetect` block.
    pub async fn local_autodetect_rules(&self) -> Vec<AutodetectRule> {
        self.read_local_manifests()
            .await
            .iter()
            .filter_map(|(folder, manifest)| {
                manifest
                    .autodetect
                    .as_ref()
                    .map(|block| AutodetectRule::from_block(folder, block))
            })
            .collect()
    }

    /// Detection rules of registry modules that are not in `installed`.
    pub async fn fetch_modules_for_autodetect(
        &self,
        installed: &BTreeSet<String>,
    ) -> ModuleResult<Vec<AutodetectRule>> {
        let manifests = self.fetch_remote_manifests(false).await?;
        Ok(manifests
            .iter()
            .filter(|summary| !installed.contains(&summary.folder))
            .filter_map(|summary| {
                let block = summary.raw.get("autodetect")?;
                match serde_json::from_value::<AutodetectBlock>(block.clone()) {
                    Ok(block) => Some(AutodetectRule::from_block(&summary.folder, &block)),
                    Err(e) => {
                        warn!("Ignoring autodetect block of {}: {}", summary.folder, e);
                        None
                    }
                }
            })
            .collect())
    }

    /// Finds the module for a game: installed modules first, then the registry.
    pub async fn detect_engine(&self, game_path: &Path) -> ModuleResult<Option<EngineMatch>> {
        let local = self.local_autodetect_rules().await;
        if let Some(detection) = detect_blocking(game_path, local).await? {
            return Ok(Some(EngineMatch {
                detection,
                installed: true,
            }));
        }

        let installed = self.list_installed().await;
        let remote = self.fetch_modules_for_autodetect(&installed).await?;
        Ok(detect_blocking(game_path, remote)
            .await?
            .map(|detection| EngineMatch {
                detection,
                installed: false,
            }))
    }

    // ── Games ───────────────────────────────────────────

    /// Reconciles a game's saved arguments against the module's current schema.
    pub async fn reconcile_game_args(
        &self,
        folder: &str,
        values: &Map<String, Value>,
    ) -> ModuleResult<Option<Map<String, Value>>> {
        validate_folder(folder)?;
        let manifest = self.store.read_manifest(folder).await?;
        Ok(reconcile_game_args(&manifest.game_args, values))
    }

    /// Launches a game through its module's launcher, offering to install the module
    /// first when it is missing.
    #[instrument(skip(self, game, ui, progress, cancel), fields(engine = %game.engine))]
    pub async fn launch_game(
        &self,
        game: &GameRef,
        ui: &dyn UiHandle,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> ModuleResult<LaunchOutcome> {
        let folder = game.engine.as_str();
        validate_folder(folder)?;
        if !self.store.is_installed(folder).await {
            let install = ui
                .confirm(
                    &format!("The \"{folder}\" module is required but not installed. Install it now?"),
                    "Module not installed",
                )
                .await;
            if !install {
                return Ok(LaunchOutcome::Declined);
            }
            self.install(folder, progress, cancel).await?;
        }

        let manifest = self.store.read_manifest(folder).await?;
        let game_folder = game_folder(&game.path).await;
        normalize_tree(&game_folder).await;

        let updated_args = reconcile_game_args(&manifest.game_args, &game.args);
        let request = LaunchRequest {
            game_path: game.path.clone(),
            game_folder,
            game_args: updated_args.clone().unwrap_or_else(|| game.args.clone()),
            game_title: game.title.clone(),
        };

        let hooks = self
            .module_hooks(folder)
            .ok_or_else(|| ModuleError::MissingLauncher(folder.to_string()))?;
        let launcher = hooks
            .launcher()
            .ok_or_else(|| ModuleError::MissingLauncher(folder.to_string()))?;
        let module_dir = self.store.module_dir(folder);
        launcher
            .launch(&self.hook_context(folder, &module_dir), &request, ui)
            .await
            .map_err(|e| hook_error(folder, "launcher", e))?;

        info!("Launched {:?} with {}", game.title, folder);
        Ok(LaunchOutcome::Launched { updated_args })
    }

    /// Gives the game's module a chance to clean up after the game is removed.
    pub async fn run_post_delete(&self, game: &GameRef, ui: &dyn UiHandle) {
        let folder = game.engine.as_str();
        if let Err(e) = validate_folder(folder) {
            warn!("Skipping postdelete hook: {}", e);
            return;
        }
        let Some(hooks) = self.module_hooks(folder) else {
            return;
        };
        let Some(hook) = hooks.post_delete() else {
            return;
        };
        let module_dir = self.store.module_dir(folder);
        let game_folder = game_folder(&game.path).await;
        if let Err(e) = hook
            .post_delete(
                &self.hook_context(folder, &module_dir),
                &game.title,
                &game_folder,
                &game.path,
                ui,
            )
            .await
        {
            warn!("postdelete hook for {} failed: {}", folder, e);
        }
    }

    // ── Multi-version catalog ───────────────────────────

    /// Versions the module's catalog offers, or none without a catalog.
    pub async fn available_versions(
        &self,
        folder: &str,
    ) -> ModuleResult<IndexMap<String, BuildSpecByArch>> {
        validate_folder(folder)?;
        if !self.store.is_installed(folder).await {
            return Err(ModuleError::ModuleNotInstalled(folder.to_string()));
        }
        let Some(hooks) = self.module_hooks(folder) else {
            return Ok(IndexMap::new());
        };
        let Some(catalog) = hooks.version_catalog() else {
            return Ok(IndexMap::new());
        };
        let module_dir = self.store.module_dir(folder);
        catalog
            .available_versions(&self.hook_context(folder, &module_dir))
            .await
            .map_err(|e| hook_error(folder, "versions", e))
    }

    async fn require_multi_version(&self, folder: &str, arg: &str) -> ModuleResult<PathBuf> {
        validate_folder(folder)?;
        let manifest = self.store.read_manifest(folder).await?;
        if !manifest.is_multi_version_arg(arg) || !is_single_segment(arg) {
            return Err(ModuleError::NotMultiVersion {
                folder: folder.to_string(),
                arg: arg.to_string(),
            });
        }
        Ok(self.store.deps_dir(folder).join(arg))
    }

    /// Installed versions of a multi-version argument, newest first.
    pub async fn installed_versions(&self, folder: &str, arg: &str) -> ModuleResult<Vec<String>> {
        let dir = self.require_multi_version(folder, arg).await?;
        let mut versions = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
            Err(source) => return Err(ModuleError::io(&dir, source)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| ModuleError::io(&dir, source))?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort_by(|a, b| compare_versions(b, a));
        Ok(versions)
    }

    /// Downloads one catalog version into `deps/<arg>/<version>/`.
    #[instrument(skip(self, progress, cancel))]
    pub async fn install_version(
        &self,
        folder: &str,
        arg: &str,
        version: &str,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> ModuleResult<InstalledDependency> {
        let lock = self.job_lock(folder);
        let _job = lock.lock().await;

        let arg_dir = self.require_multi_version(folder, arg).await?;
        let target = version_dir(&arg_dir, folder, version)?;
        let catalog = self.available_versions(folder).await?;
        let builds = catalog
            .get(version)
            .ok_or_else(|| ModuleError::UnknownVersion {
                folder: folder.to_string(),
                version: version.to_string(),
            })?;

        let mut deps = DependencyMap::new();
        deps.insert(arg.to_string(), builds.clone());
        let mut steps =
            StepTracker::new(progress.clone(), folder, self.installer.estimate_steps(&deps));

        if target.exists() {
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(|source| ModuleError::io(&target, source))?;
        }
        let label = format!("{arg} {version}");
        match self
            .installer
            .install_one(&label, builds, &target, &mut steps, cancel)
            .await
        {
            Ok(installed) => {
                normalize_tree(&arg_dir).await;
                Ok(installed)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&target).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial {:?}: {}", target, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    /// Removes one installed version. Missing versions are not an error.
    pub async fn remove_version(&self, folder: &str, arg: &str, version: &str) -> ModuleResult<()> {
        let lock = self.job_lock(folder);
        let _job = lock.lock().await;

        let arg_dir = self.require_multi_version(folder, arg).await?;
        let target = version_dir(&arg_dir, folder, version)?;
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ModuleError::io(target, source)),
        }
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules_dir", &self.store.modules_dir())
            .field("repo", &self.registry.repo_key())
            .field("hooks", &self.hooks)
            .finish()
    }
}

fn hook_error(folder: &str, hook: &'static str, err: ModuleError) -> ModuleError {
    match err {
        ModuleError::Cancelled => ModuleError::Cancelled,
        other => ModuleError::Hook {
            folder: folder.to_string(),
            hook,
            message: other.to_string(),
        },
    }
}

/// `deps/<arg>/<version>`, rejecting versions that are not a single path segment.
fn version_dir(arg_dir: &Path, folder: &str, version: &str) -> ModuleResult<PathBuf> {
    if !is_single_segment(version) {
        return Err(ModuleError::UnknownVersion {
            folder: folder.to_string(),
            version: version.to_string(),
        });
    }
    Ok(arg_dir.join(version))
}

/// Folder holding the game: the path itself for directories, otherwise its parent.
async fn game_folder(game_path: &Path) -> PathBuf {
    let is_dir = tokio::fs::metadata(game_path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if is_dir {
        return game_path.to_path_buf();
    }
    game_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| game_path.to_path_buf())
}

async fn detect_blocking(
    game_path: &Path,
    rules: Vec<AutodetectRule>,
) -> ModuleResult<Option<Detection>> {
    if rules.is_empty() {
        return Ok(None);
    }
    let path = game_path.to_path_buf();
    tokio::task::spawn_blocking(move || detect(&path, &rules))
        .await
        .map_err(|e| ModuleError::Other(format!("Task join error: {e}")))
}
