pub mod dependency_updates;
pub mod disk;
pub mod remote_manifests;

pub use dependency_updates::{DependencyUpdateCache, DependencyUpdateSnapshot};
pub use remote_manifests::{RemoteManifestCache, RemoteManifestSnapshot};
