// ─── Module version ordering ───
// Versions are free-form dot/dash segmented strings ("v1.2.0", "0.101.0-beta").

use std::cmp::Ordering;

use super::model::UNKNOWN_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    /// Decimal digits without leading zeros, so any length compares exactly.
    Number(&'a str),
    Text(&'a str),
}

const ZERO: Segment<'static> = Segment::Number("");

impl Ord for Segment<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            // Numbers rank above text at the same position.
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Segment<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn normalize(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
}

fn segments(version: &str) -> Vec<Segment<'_>> {
    normalize(version)
        .split(['.', '-'])
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return ZERO;
            }
            if part.bytes().all(|b| b.is_ascii_digit()) {
                Segment::Number(part.trim_start_matches('0'))
            } else {
                Segment::Text(part)
            }
        })
        .collect()
}

/// Orders two module versions segment by segment. Missing trailing segments count as `0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = segments(a);
    let right = segments(b);
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).cloned().unwrap_or(ZERO);
        let r = right.get(i).cloned().unwrap_or(ZERO);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn is_known(version: Option<&str>) -> Option<&str> {
    version
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != UNKNOWN_VERSION)
}

/// True only when both versions are known and `remote` is strictly newer.
pub fn has_update(local: Option<&str>, remote: Option<&str>) -> bool {
    match (is_known(local), is_known(remote)) {
        (Some(local), Some(remote)) => compare_versions(remote, local) == Ordering::Greater,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_v_and_missing_segments() {
        assert_eq!(compare_versions("v1.2.0", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("V2", "2.0.0"), Ordering::Equal);
    }

    #[test]
    fn numeric_ordering() {
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("0.100.0", "0.101.0"), Ordering::Less);
    }

    #[test]
    fn long_numeric_segments_stay_numeric() {
        let huge = "1.99999999999999999999999";
        assert_eq!(compare_versions(huge, "1.0"), Ordering::Greater);
        assert_eq!(compare_versions(huge, "1.18446744073709551615"), Ordering::Greater);
        assert_eq!(compare_versions("1.007", "1.7"), Ordering::Equal);
        assert_eq!(compare_versions("1.000", "1"), Ordering::Equal);
        assert_eq!(compare_versions("100000000000000000000", "beta"), Ordering::Greater);
    }

    #[test]
    fn numeric_ranks_above_text() {
        assert_eq!(compare_versions("1.0.0", "1.0.0-beta"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Less);
    }

    #[test]
    fn text_segments_compare_lexicographically() {
        assert_eq!(
            compare_versions("1.0.0-beta", "1.0.0-alpha"),
            Ordering::Greater
        );
        assert_eq!(compare_versions("1.0-rc", "1.0-rc"), Ordering::Equal);
    }

    #[test]
    fn unknown_versions_never_update() {
        assert!(!has_update(Some("N/A"), Some("1.0.0")));
        assert!(!has_update(Some("1.0.0"), Some("N/A")));
        assert!(!has_update(None, Some("9.9.9")));
        assert!(!has_update(Some("1.0.0"), None));
        assert!(!has_update(Some(""), Some("1.0.0")));
    }

    #[test]
    fn newer_remote_is_update() {
        assert!(has_update(Some("1.0.0"), Some("1.0.1")));
        assert!(!has_update(Some("1.0.1"), Some("1.0.1")));
        assert!(!has_update(Some("2.0"), Some("1.9")));
    }
}
