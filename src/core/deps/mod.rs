pub mod installer;
pub mod permissions;
pub mod platform;

pub use installer::{
    check_dependency_names, DependencyInstaller, DependencyState, InstalledDependency, DEPS_DIR,
};
pub use permissions::normalize_tree;
pub use platform::{ensure_min_disk_space, host_arch, resolve_build};
