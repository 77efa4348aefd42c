use serde::{Deserialize, Serialize};

use crate::core::manifest::AutodetectBlock;

/// Lower-cases an extension and strips leading dots: `.EXE` → `exe`.
pub fn normalize_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// One module's detection rule, normalized from its manifest `autodetect` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutodetectRule {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, rename = "filePatterns", skip_serializing_if = "Vec::is_empty")]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub all_required: bool,
}

impl AutodetectRule {
    pub fn from_block(key: &str, block: &AutodetectBlock) -> Self {
        let mut extensions: Vec<String> = block
            .extensions
            .iter()
            .map(|e| normalize_ext(e))
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            if let Some(single) = block.extension.as_deref() {
                let single = normalize_ext(single);
                if !single.is_empty() {
                    extensions.push(single);
                }
            }
        }
        Self {
            key: key.to_string(),
            extensions,
            files: block.files.clone(),
            file_patterns: block.file_patterns.clone(),
            all_required: block.all_required,
        }
    }

    pub fn has_ext_rule(&self) -> bool {
        !self.extensions.is_empty()
    }

    pub fn has_file_rule(&self) -> bool {
        !self.files.is_empty() || !self.file_patterns.is_empty()
    }
}
