// Best-effort quarantine and permission cleanup. Nothing here may fail a job.

use std::path::Path;

use tracing::{debug, warn};

/// Clears macOS quarantine attributes and makes the tree owner-accessible (0700).
pub async fn normalize_tree(root: &Path) {
    if !root.exists() {
        return;
    }
    clear_quarantine(root).await;

    let root_buf = root.to_path_buf();
    let result = tokio::task::spawn_blocking(move || chmod_tree(&root_buf)).await;
    match result {
        Ok(0) => {}
        Ok(failures) => warn!("{} permission changes failed under {:?}", failures, root),
        Err(e) => warn!("Permission normalization task failed for {:?}: {}", root, e),
    }
}

#[cfg(target_os = "macos")]
async fn clear_quarantine(root: &Path) {
    match tokio::process::Command::new("xattr")
        .arg("-cr")
        .arg(root)
        .output()
        .await
    {
        Ok(output) if output.status.success() => {}
        Ok(output) => warn!(
            "xattr -cr {:?} exited with {}: {}",
            root,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => warn!("Could not run xattr on {:?}: {}", root, e),
    }
}

#[cfg(not(target_os = "macos"))]
async fn clear_quarantine(root: &Path) {
    debug!("No quarantine attributes to clear on this platform for {:?}", root);
}

#[cfg(unix)]
fn chmod_tree(root: &Path) -> usize {
    use std::os::unix::fs::PermissionsExt;

    let mut failures = 0;
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                failures += 1;
                continue;
            }
        };
        if entry.path_is_symlink() {
            continue;
        }
        if let Err(e) =
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(0o700))
        {
            debug!("chmod 700 {:?} failed: {}", entry.path(), e);
            failures += 1;
        }
    }
    failures
}

#[cfg(not(unix))]
fn chmod_tree(_root: &Path) -> usize {
    0
}
