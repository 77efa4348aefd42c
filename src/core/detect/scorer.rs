// ─── Autodetect Scoring ───
// Hard rules (`all_required`) either match completely or not at all and beat any soft
// score. Soft rules score `ext (0|1) + fileMatches / fileTotal`.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::rules::{normalize_ext, AutodetectRule};
use crate::core::archive::sanitize_entry_path;

/// Winning rule and the evidence behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub key: String,
    pub score: f64,
    pub file_matches: usize,
    pub ext_match: bool,
    /// Matched as a hard (`all_required`) rule.
    pub strong: bool,
}

/// Lower-cased extension of the last path component, ignoring trailing separators.
pub fn path_ext(path: &Path) -> String {
    let text = path.to_string_lossy();
    let trimmed = text.trim().trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    match base.rfind('.') {
        Some(idx) => normalize_ext(&base[idx + 1..]),
        None => String::new(),
    }
}

/// Directory whose contents are checked against file rules: a `.app` bundle itself,
/// a directory itself, otherwise the file's parent.
pub fn probe_dir(path: &Path) -> PathBuf {
    if path_ext(path) == "app" || path.is_dir() {
        return path.to_path_buf();
    }
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Recursive listing of `dir` as `/`-separated relative paths.
fn list_relative(dir: &Path) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(dir).ok()?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct RuleMatch {
    ext_match: bool,
    file_matches: usize,
    file_total: usize,
}

struct Probe<'a> {
    dir: &'a Path,
    ext: String,
    listing: Option<Vec<String>>,
}

impl Probe<'_> {
    fn listing(&mut self) -> &[String] {
        let dir = self.dir;
        self.listing.get_or_insert_with(|| list_relative(dir))
    }

    fn evaluate(&mut self, rule: &AutodetectRule) -> RuleMatch {
        let ext_match = rule.has_ext_rule() && rule.extensions.iter().any(|e| *e == self.ext);

        let mut file_matches = 0;
        let mut file_total = 0;
        for rel in &rule.files {
            let Some(rel) = sanitize_entry_path(rel) else {
                warn!("Ignoring file {:?} outside the game folder in rule {}", rel, rule.key);
                continue;
            };
            file_total += 1;
            if self.dir.join(rel).exists() {
                file_matches += 1;
            }
        }

        if !rule.file_patterns.is_empty() {
            let patterns: Vec<Regex> = rule
                .file_patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Ignoring bad file pattern {:?} in rule {}: {}", p, rule.key, e);
                        None
                    }
                })
                .collect();
            file_total += patterns.len();
            let listing = self.listing();
            file_matches += patterns
                .iter()
                .filter(|re| listing.iter().any(|f| re.is_match(f)))
                .count();
        }

        RuleMatch {
            ext_match,
            file_matches,
            file_total,
        }
    }
}

/// Picks the best-matching rule for `path`, or `None` when nothing scores.
pub fn detect(path: &Path, rules: &[AutodetectRule]) -> Option<Detection> {
    if path.as_os_str().is_empty() {
        return None;
    }
    let dir = probe_dir(path);
    let mut probe = Probe {
        dir: &dir,
        ext: path_ext(path),
        listing: None,
    };

    let mut strong: Vec<Detection> = Vec::new();
    let mut best: Option<Detection> = None;

    for rule in rules {
        let m = probe.evaluate(rule);

        if rule.all_required {
            let need_ext = !rule.has_ext_rule() || m.ext_match;
            // Declared file rules that were all unusable cannot be satisfied.
            let need_files = if rule.has_file_rule() {
                m.file_total > 0 && m.file_matches == m.file_total
            } else {
                true
            };
            if need_ext && need_files {
                strong.push(Detection {
                    key: rule.key.clone(),
                    score: f64::from(u8::from(m.ext_match)) + m.file_matches as f64,
                    file_matches: m.file_matches,
                    ext_match: m.ext_match,
                    strong: true,
                });
            }
            continue;
        }

        let mut score = if m.ext_match { 1.0 } else { 0.0 };
        if m.file_total > 0 {
            score += m.file_matches as f64 / m.file_total as f64;
        }
        if score <= 0.0 {
            continue;
        }
        let candidate = Detection {
            key: rule.key.clone(),
            score,
            file_matches: m.file_matches,
            ext_match: m.ext_match,
            strong: false,
        };
        let replace = match &best {
            None => true,
            Some(current) if score > current.score => true,
            Some(current) if score == current.score => {
                m.file_matches > current.file_matches
                    || (m.file_matches == current.file_matches
                        && m.ext_match
                        && !current.ext_match)
            }
            Some(_) => false,
        };
        if replace {
            best = Some(candidate);
        }
    }

    if !strong.is_empty() {
        // Stable sort keeps declaration order among equals.
        strong.sort_by(|a, b| {
            b.file_matches
                .cmp(&a.file_matches)
                .then(b.ext_match.cmp(&a.ext_match))
        });
        let winner = strong.swap_remove(0);
        debug!("Strong autodetect match {} for {:?}", winner.key, path);
        return Some(winner);
    }

    if let Some(found) = &best {
        debug!("Autodetect {} scored {:.2} for {:?}", found.key, found.score, path);
    }
    best
}
