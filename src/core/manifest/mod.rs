pub mod model;
pub mod registry;
pub mod store;
pub mod version;

pub use model::{
    AutodetectBlock, BuildSpec, BuildSpecByArch, DependencyMap, GameArgSpec, ManifestSummary,
    ModuleManifest, MANIFEST_FILE, UNIVERSAL_ARCH, UNKNOWN_VERSION,
};
pub use registry::{ContentItem, ContentKind, RegistryClient};
pub use store::{validate_folder, ModuleStore};
pub use version::{compare_versions, has_update};
