// ─── Module Manifest ───
// `manifest.json` as shipped in every module folder, local or remote.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const UNKNOWN_VERSION: &str = "N/A";

/// Architecture key that matches every host.
pub const UNIVERSAL_ARCH: &str = "universal";

/// One downloadable build of a dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSpec {
    pub link: String,
    #[serde(default)]
    pub unzip: bool,
}

/// Builds of one dependency keyed by `x86_64`, `arm64` or `universal`.
pub type BuildSpecByArch = IndexMap<String, BuildSpec>;

/// Dependency name → builds, in declaration order.
pub type DependencyMap = IndexMap<String, BuildSpecByArch>;

/// `autodetect` block of a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutodetectBlock {
    #[serde(default, alias = "ext", skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    /// Single-extension shorthand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Relative paths that must exist next to the game.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Regular expressions matched against the recursive file listing.
    #[serde(
        default,
        rename = "filePatterns",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub file_patterns: Vec<String>,
    #[serde(default, alias = "requireAllFiles")]
    pub all_required: bool,
}

/// Schema of one per-game launch argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameArgSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GameArgSpec {
    /// The argument's values are installable dependency versions kept under `deps/<key>/`.
    pub fn is_multi_version(&self) -> bool {
        matches!(
            self.kind.to_ascii_lowercase().as_str(),
            "multi-version" | "multi_version" | "multiversion"
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.kind.to_ascii_lowercase().as_str(), "boolean" | "bool")
    }

    /// Explicit default, `false` for booleans, otherwise null.
    pub fn default_value(&self) -> Value {
        match &self.default {
            Some(value) => value.clone(),
            None if self.is_boolean() => Value::Bool(false),
            None => Value::Null,
        }
    }

    /// Whether `value` has the JSON shape this argument type expects.
    pub fn accepts(&self, value: &Value) -> bool {
        match self.kind.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => value.is_boolean(),
            "number" | "integer" | "int" | "float" => value.is_number(),
            "string" | "text" | "path" => value.is_string(),
            "select" | "choice" | "enum" => match &self.options {
                Some(options) if !options.is_empty() => options.contains(value),
                _ => value.is_string(),
            },
            "multi-version" | "multi_version" | "multiversion" => value.is_string(),
            _ => true,
        }
    }
}

/// A module manifest. Unknown fields survive in `raw`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: DependencyMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autodetect: Option<AutodetectBlock>,
    #[serde(default, rename = "gameArgs")]
    pub game_args: IndexMap<String, GameArgSpec>,
    /// The module ships its own dependency-update check.
    #[serde(default)]
    pub updates: bool,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl ModuleManifest {
    pub fn display_name(&self, folder: &str) -> String {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(folder)
            .to_string()
    }

    /// Declared version, or `"N/A"`.
    pub fn version_or_unknown(&self) -> &str {
        self.version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(UNKNOWN_VERSION)
    }

    /// Keys of `gameArgs` entries whose type is multi-version.
    pub fn multi_version_args(&self) -> Vec<String> {
        self.game_args
            .iter()
            .filter(|(_, spec)| spec.is_multi_version())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn is_multi_version_arg(&self, key: &str) -> bool {
        self.game_args
            .get(key)
            .map(GameArgSpec::is_multi_version)
            .unwrap_or(false)
    }
}

/// Registry-side view of a module, as shown in the module browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestSummary {
    pub folder: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    /// Full manifest JSON; empty when the fetch failed.
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl ManifestSummary {
    pub fn from_manifest(folder: &str, raw: Map<String, Value>) -> Self {
        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        Self {
            folder: folder.to_string(),
            name: text("name").unwrap_or_else(|| folder.to_string()),
            version: text("version").unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            author: text("author").unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            description: text("description").unwrap_or_default(),
            raw,
        }
    }

    /// Summary for a module whose manifest could not be fetched.
    pub fn degraded(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            name: folder.to_string(),
            version: UNKNOWN_VERSION.to_string(),
            author: UNKNOWN_VERSION.to_string(),
            description: "Failed to load manifest".to_string(),
            raw: Map::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.raw.is_empty()
    }

    /// Typed view of `raw`, if it parses.
    pub fn manifest(&self) -> Option<ModuleManifest> {
        if self.raw.is_empty() {
            return None;
        }
        serde_json::from_value(Value::Object(self.raw.clone())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NWJS: &str = r#"{
        "name": "NW.js",
        "version": "1.2.0",
        "author": "m5kro",
        "description": "RPG Maker MV/MZ",
        "dependencies": {
            "cheat-js": { "universal": { "link": "https://example.com/Cheat_Menu.js", "unzip": false } },
            "nwjs": {
                "x86_64": { "link": "https://example.com/nwjs-x64.zip", "unzip": true },
                "arm64": { "link": "https://example.com/nwjs-arm64.zip", "unzip": true }
            }
        },
        "autodetect": { "extensions": ["exe"], "files": ["www/js/rpg_core.js"], "all_required": false },
        "gameArgs": {
            "version": { "type": "multi-version", "default": "v0.101.0" },
            "cheat": { "type": "boolean" }
        },
        "updates": true,
        "homepage": "https://example.com"
    }"#;

    #[test]
    fn deserialize_full_manifest() {
        let manifest: ModuleManifest = serde_json::from_str(NWJS).unwrap();
        assert_eq!(manifest.display_name("nwjs"), "NW.js");
        assert_eq!(manifest.version_or_unknown(), "1.2.0");
        assert!(manifest.updates);
        let deps: Vec<_> = manifest.dependencies.keys().cloned().collect();
        assert_eq!(deps, vec!["cheat-js", "nwjs"]);
        assert!(manifest.dependencies["nwjs"]["arm64"].unzip);
        assert_eq!(manifest.multi_version_args(), vec!["version"]);
        assert_eq!(manifest.raw["homepage"], "https://example.com");
    }

    #[test]
    fn missing_name_and_version_fall_back() {
        let manifest: ModuleManifest = serde_json::from_str("{}").unwrap();
        assert_eq!(manifest.display_name("mkxpz"), "mkxpz");
        assert_eq!(manifest.version_or_unknown(), UNKNOWN_VERSION);
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn autodetect_aliases() {
        let block: AutodetectBlock = serde_json::from_str(
            r#"{ "ext": ["EXE"], "filePatterns": ["\\.rgss3a$"], "requireAllFiles": true }"#,
        )
        .unwrap();
        assert_eq!(block.extensions, vec!["EXE"]);
        assert_eq!(block.file_patterns, vec!["\\.rgss3a$"]);
        assert!(block.all_required);
    }

    #[test]
    fn game_arg_defaults() {
        let manifest: ModuleManifest = serde_json::from_str(NWJS).unwrap();
        assert_eq!(manifest.game_args["cheat"].default_value(), Value::Bool(false));
        assert_eq!(
            manifest.game_args["version"].default_value(),
            Value::String("v0.101.0".into())
        );
    }

    #[test]
    fn degraded_summary_is_unknown() {
        let summary = ManifestSummary::degraded("nwjs");
        assert!(summary.is_unknown());
        assert_eq!(summary.version, UNKNOWN_VERSION);
        assert!(summary.manifest().is_none());
    }

    #[test]
    fn summary_from_raw() {
        let raw: Map<String, Value> = serde_json::from_str(r#"{ "version": "2.0" }"#).unwrap();
        let summary = ManifestSummary::from_manifest("mkxpz", raw);
        assert_eq!(summary.name, "mkxpz");
        assert_eq!(summary.version, "2.0");
        assert_eq!(summary.author, UNKNOWN_VERSION);
        assert!(summary.manifest().is_some());
    }
}
