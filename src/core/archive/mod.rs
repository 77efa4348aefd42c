pub mod extract;

pub use extract::{
    extract_archive, is_single_segment, sanitize_entry_path, ArchiveKind, ExtractReport,
};
