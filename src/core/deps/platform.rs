use std::path::Path;

use crate::core::error::{ModuleError, ModuleResult};
use crate::core::manifest::{BuildSpec, BuildSpecByArch, UNIVERSAL_ARCH};

/// Host architecture in manifest terms: `x86_64` or `arm64`.
pub fn host_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "x86_64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// Picks the build for `arch`, preferring `universal` when the dependency ships one.
pub fn resolve_build<'a>(
    dependency: &str,
    builds: &'a BuildSpecByArch,
    arch: &str,
) -> ModuleResult<(&'a str, &'a BuildSpec)> {
    if let Some((key, spec)) = builds.get_key_value(UNIVERSAL_ARCH) {
        return Ok((key.as_str(), spec));
    }
    builds
        .get_key_value(arch)
        .map(|(key, spec)| (key.as_str(), spec))
        .ok_or_else(|| ModuleError::MissingBuild {
            dependency: dependency.to_string(),
            arch: arch.to_string(),
        })
}

/// Fails when the volume holding `path` has less than `minimum_bytes` free.
/// Paths on volumes sysinfo does not report pass.
pub fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> ModuleResult<()> {
    if minimum_bytes == 0 {
        return Ok(());
    }
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    match available {
        Some(bytes) if bytes < minimum_bytes => Err(ModuleError::InsufficientDiskSpace {
            available: bytes,
            required: minimum_bytes,
        }),
        _ => Ok(()),
    }
}
