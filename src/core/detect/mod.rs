pub mod rules;
pub mod scorer;

pub use rules::{normalize_ext, AutodetectRule};
pub use scorer::{detect, path_ext, probe_dir, Detection};
