// ─── Update Stash ───
// Per-job holding area for everything a full module update must not lose: the
// multi-version dependency directories and the previous module tree.
//
// Layout under the shared stash root:
//   <job-id>/deps/<argKey>/<version>/...
//   <job-id>/module/...

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::core::error::{ModuleError, ModuleResult};

const STASHED_DEPS: &str = "deps";
const STASHED_MODULE: &str = "module";

/// Moves a directory tree, falling back to copy + delete when a rename is not
/// possible (e.g. across filesystems).
pub async fn move_dir(src: &Path, dst: &Path) -> ModuleResult<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ModuleError::io(parent, source))?;
    }
    match tokio::fs::rename(src, dst).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!("rename {:?} -> {:?} failed ({}), copying instead", src, dst, e),
    }

    let (from, to) = (src.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || copy_tree(&from, &to))
        .await
        .map_err(|e| ModuleError::Other(format!("Task join error: {e}")))??;
    tokio::fs::remove_dir_all(src)
        .await
        .map_err(|source| ModuleError::io(src, source))
}

fn copy_tree(src: &Path, dst: &Path) -> ModuleResult<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| ModuleError::Other(format!("Walking {src:?}: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ModuleError::Other(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|source| ModuleError::io(&target, source))?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)
                .map_err(|source| ModuleError::io(&target, source))?;
        } else {
            #[cfg(unix)]
            {
                let link = std::fs::read_link(entry.path())
                    .map_err(|source| ModuleError::io(entry.path(), source))?;
                std::os::unix::fs::symlink(&link, &target)
                    .map_err(|source| ModuleError::io(&target, source))?;
            }
        }
    }
    Ok(())
}

async fn remove_tree(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}

/// One update job's stash.
#[derive(Debug)]
pub struct UpdateStash {
    root: PathBuf,
    dir: PathBuf,
    keys: Vec<String>,
    has_backup: bool,
}

impl UpdateStash {
    pub async fn create(stash_root: &Path) -> ModuleResult<Self> {
        let dir = stash_root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ModuleError::io(&dir, source))?;
        Ok(Self {
            root: stash_root.to_path_buf(),
            dir,
            keys: Vec::new(),
            has_backup: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Multi-version keys held by this stash, in the order they were stashed.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.dir.join(STASHED_DEPS).join(key)
    }

    fn backup_dir(&self) -> PathBuf {
        self.dir.join(STASHED_MODULE)
    }

    /// Moves `deps_dir/<key>` into the stash.
    pub async fn stash_key(&mut self, deps_dir: &Path, key: &str) -> ModuleResult<()> {
        move_dir(&deps_dir.join(key), &self.key_dir(key)).await?;
        self.keys.push(key.to_string());
        Ok(())
    }

    /// Moves the whole module directory into the stash, leaving its path free.
    pub async fn back_up_module(&mut self, module_dir: &Path) -> ModuleResult<()> {
        move_dir(module_dir, &self.backup_dir()).await?;
        self.has_backup = true;
        Ok(())
    }

    /// Moves the stashed version folders of `key` into `target` (`deps/<key>`), keeping
    /// any version folder the fresh install already created. Returns the moved names.
    pub async fn merge_key_into(&self, key: &str, target: &Path) -> ModuleResult<Vec<String>> {
        let source = self.key_dir(key);
        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| ModuleError::io(target, e))?;

        let mut entries = tokio::fs::read_dir(&source)
            .await
            .map_err(|e| ModuleError::io(&source, e))?;
        let mut moved = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ModuleError::io(&source, e))?
        {
            let name = entry.file_name();
            let dest = target.join(&name);
            if tokio::fs::symlink_metadata(&dest).await.is_ok() {
                debug!("Keeping freshly installed {:?}", dest);
                continue;
            }
            let from = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                move_dir(&from, &dest).await?;
            } else {
                tokio::fs::rename(&from, &dest)
                    .await
                    .map_err(|e| ModuleError::io(&dest, e))?;
            }
            moved.push(name.to_string_lossy().into_owned());
        }
        moved.sort();
        Ok(moved)
    }

    /// Undoes the job. With a module backup, the backup replaces whatever a failed
    /// install left at `module_dir`; without one the live module stays as it is. The
    /// stashed keys then go back to its `deps/`.
    pub async fn restore(&self, module_dir: &Path, deps_dir_name: &str) -> ModuleResult<()> {
        if self.has_backup {
            remove_tree(module_dir).await;
            move_dir(&self.backup_dir(), module_dir).await?;
        }
        self.put_back_keys(&module_dir.join(deps_dir_name)).await?;
        info!("Restored previous install at {:?}", module_dir);
        Ok(())
    }

    /// Moves every stashed key back to `deps_dir/<key>`, replacing what is there now.
    pub async fn put_back_keys(&self, deps_dir: &Path) -> ModuleResult<()> {
        for key in &self.keys {
            let stashed = self.key_dir(key);
            if !stashed.exists() {
                continue;
            }
            let target = deps_dir.join(key);
            remove_tree(&target).await;
            move_dir(&stashed, &target).await?;
        }
        Ok(())
    }

    /// Deletes this job's stash, and the shared root only if no other job uses it.
    pub async fn discard(self) {
        remove_tree(&self.dir).await;
        match tokio::fs::remove_dir(&self.root).await {
            Ok(()) => debug!("Removed empty stash root {:?}", self.root),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(_) => debug!("Stash root {:?} still in use", self.root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn merge_keeps_fresh_versions() {
        let tmp = tempfile::tempdir().unwrap();
        let deps = tmp.path().join("module").join("deps");
        touch(&deps.join("version/0.80.0/nw"), "old-80");
        touch(&deps.join("version/0.90.0/nw"), "old-90");

        let mut stash = UpdateStash::create(&tmp.path().join("stash")).await.unwrap();
        stash.stash_key(&deps, "version").await.unwrap();
        assert!(!deps.join("version").exists());

        touch(&deps.join("version/0.90.0/nw"), "fresh-90");
        let moved = stash
            .merge_key_into("version", &deps.join("version"))
            .await
            .unwrap();

        assert_eq!(moved, vec!["0.80.0"]);
        assert_eq!(
            std::fs::read_to_string(deps.join("version/0.90.0/nw")).unwrap(),
            "fresh-90"
        );
        assert_eq!(
            std::fs::read_to_string(deps.join("version/0.80.0/nw")).unwrap(),
            "old-80"
        );
    }

    #[tokio::test]
    async fn restore_brings_back_module_and_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let module = tmp.path().join("modules").join("nwjs");
        touch(&module.join("manifest.json"), "{}");
        touch(&module.join("deps/version/0.80.0/nw"), "v80");

        let mut stash = UpdateStash::create(&tmp.path().join("stash")).await.unwrap();
        stash.stash_key(&module.join("deps"), "version").await.unwrap();
        stash.back_up_module(&module).await.unwrap();
        assert!(!module.exists());

        touch(&module.join("half-written.zip"), "partial");
        stash.restore(&module, "deps").await.unwrap();

        assert!(module.join("manifest.json").exists());
        assert!(module.join("deps/version/0.80.0/nw").exists());
        assert!(!module.join("half-written.zip").exists());
    }

    #[tokio::test]
    async fn restore_without_backup_leaves_module_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let module = tmp.path().join("modules").join("nwjs");
        touch(&module.join("manifest.json"), "{}");
        touch(&module.join("deps/version/1.0/nw"), "v1");
        touch(&module.join("deps/sdk/tool"), "sdk");

        let mut stash = UpdateStash::create(&tmp.path().join("stash")).await.unwrap();
        stash.stash_key(&module.join("deps"), "version").await.unwrap();
        stash.restore(&module, "deps").await.unwrap();
        stash.discard().await;

        assert!(module.join("manifest.json").exists());
        assert!(module.join("deps/sdk/tool").exists());
        assert_eq!(
            std::fs::read_to_string(module.join("deps/version/1.0/nw")).unwrap(),
            "v1"
        );
        assert!(!tmp.path().join("stash").exists());
    }

    #[tokio::test]
    async fn stash_failing_part_way_is_undone() {
        let tmp = tempfile::tempdir().unwrap();
        let module = tmp.path().join("modules").join("nwjs");
        let deps = module.join("deps");
        touch(&module.join("manifest.json"), "{}");
        touch(&deps.join("first/1.0/bin"), "first");
        touch(&deps.join("second/2.0/bin"), "second");

        let mut stash = UpdateStash::create(&tmp.path().join("stash")).await.unwrap();
        // A file where the second key would land makes its move fail.
        touch(&stash.key_dir("second"), "blocker");

        stash.stash_key(&deps, "first").await.unwrap();
        assert!(stash.stash_key(&deps, "second").await.is_err());
        assert_eq!(stash.keys(), ["first".to_string()]);

        stash.restore(&module, "deps").await.unwrap();
        assert!(module.join("manifest.json").exists());
        assert!(deps.join("first/1.0/bin").exists());
        assert!(deps.join("second/2.0/bin").exists());
    }

    #[tokio::test]
    async fn put_back_replaces_partial_target() {
        let tmp = tempfile::tempdir().unwrap();
        let deps = tmp.path().join("deps");
        touch(&deps.join("nwjs/nw"), "old");

        let mut stash = UpdateStash::create(&tmp.path().join("stash")).await.unwrap();
        stash.stash_key(&deps, "nwjs").await.unwrap();
        touch(&deps.join("nwjs/nw.zip.part"), "half");

        stash.put_back_keys(&deps).await.unwrap();
        assert_eq!(std::fs::read_to_string(deps.join("nwjs/nw")).unwrap(), "old");
        assert!(!deps.join("nwjs/nw.zip.part").exists());
    }

    #[tokio::test]
    async fn discard_leaves_other_jobs_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("stash");
        let first = UpdateStash::create(&root).await.unwrap();
        let second = UpdateStash::create(&root).await.unwrap();
        let second_dir = second.dir().to_path_buf();

        first.discard().await;
        assert!(root.exists());
        assert!(second_dir.exists());

        second.discard().await;
        assert!(!root.exists());
    }

    #[test]
    fn copy_tree_reproduces_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("src/a/b/c.txt"), "c");
        copy_tree(&tmp.path().join("src"), &tmp.path().join("dst")).unwrap();
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("dst/a/b/c.txt")).unwrap(),
            "c"
        );
    }
}
