//! Ordering and suffix handling for Debian package versions.
//!
//! Ordering is delegated to [`debversion::Version`]. Strings that are empty or
//! that the parser rejects still take part in the ordering: they sort below
//! every parseable version and among themselves by plain string comparison,
//! so [`compare`] is total.

use debversion::Version;
use lazy_regex::regex_captures;
use std::cmp::Ordering;

fn parse(version: &str) -> Option<Version> {
    let version = version.trim();
    if version.is_empty() {
        return None;
    }
    version.parse().ok()
}

/// Compare two version strings with dpkg semantics.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.trim().cmp(b.trim()),
    }
}

/// Whether `a` sorts strictly after `b`.
pub fn is_newer(a: &str, b: &str) -> bool {
    compare(a, b) == Ordering::Greater
}

/// Remove a leading `N:` epoch.
pub fn strip_epoch(version: &str) -> &str {
    match version.split_once(':') {
        Some((epoch, rest)) if !epoch.is_empty() && epoch.bytes().all(|b| b.is_ascii_digit()) => {
            rest
        }
        _ => version,
    }
}

fn split_epoch(version: &str) -> (&str, &str) {
    let rest = strip_epoch(version);
    (&version[..version.len() - rest.len()], rest)
}

/// Whether the version carries the local distribution's modification marker.
///
/// The marker is the distribution name, matched case-insensitively anywhere
/// in the version after its epoch.
pub fn has_local_marker(version: &str, distro: &str) -> bool {
    !distro.is_empty()
        && strip_epoch(version)
            .to_lowercase()
            .contains(&distro.to_lowercase())
}

/// A version split into its rebuild counter and everything before it.
///
/// Counters live in the Debian revision (`1.0-1b2`). Native versions have no
/// revision and use a `+b<n>` suffix instead (`1.0+b2`), which keeps upstream
/// betas such as `2.0b1` intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSuffix<'a> {
    /// The version without the counter, epoch included.
    pub base: &'a str,
    /// The counter, if any.
    pub counter: Option<u32>,
}

impl<'a> RebuildSuffix<'a> {
    pub fn parse(version: &'a str) -> Self {
        let (_, body) = split_epoch(version);
        let stem_len = match body.rfind('-') {
            Some(dash) => {
                let revision = &body[dash + 1..];
                regex_captures!(r"^(.+?)b(\d+)$", revision)
                    .and_then(|(_, base, n)| Some((dash + 1 + base.len(), n.parse::<u32>().ok()?)))
            }
            None => regex_captures!(r"^(.+)\+b(\d+)$", body)
                .and_then(|(_, base, n)| Some((base.len(), n.parse::<u32>().ok()?))),
        };

        match stem_len {
            Some((len, counter)) => Self {
                base: &version[..version.len() - body.len() + len],
                counter: Some(counter),
            },
            None => Self {
                base: version,
                counter: None,
            },
        }
    }

    fn is_native(&self) -> bool {
        !strip_epoch(self.base).contains('-')
    }
}

/// Strip a rebuild counter, if present.
pub fn without_rebuild_suffix(version: &str) -> &str {
    RebuildSuffix::parse(version).base
}

/// The next rebuild version: `1.0-1` becomes `1.0-1b1`, `1.0-1b1` becomes
/// `1.0-1b2` and the native `1.0` becomes `1.0+b1`.
pub fn bump_rebuild(version: &str) -> String {
    let suffix = RebuildSuffix::parse(version);
    let next = suffix.counter.map_or(1, |n| n + 1);
    if suffix.is_native() {
        format!("{}+b{}", suffix.base, next)
    } else {
        format!("{}b{}", suffix.base, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_basic() {
        assert_eq!(compare("1.0-1", "1.0-1"), Ordering::Equal);
        assert_eq!(compare("1.0-2", "1.0-1"), Ordering::Greater);
        assert_eq!(compare("1.0-1", "1.1-1"), Ordering::Less);
        assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
    }

    #[test]
    fn test_epoch_dominates() {
        assert_eq!(compare("1:2.0-1", "2.0-1"), Ordering::Greater);
        assert_eq!(compare("1:0.1", "9.9"), Ordering::Greater);
        assert_eq!(compare("0:1.0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_tilde_sorts_before_release() {
        assert_eq!(compare("1.0", "1.0~rc1"), Ordering::Greater);
        assert_eq!(compare("1.0~rc1", "1.0~rc1~1"), Ordering::Greater);
    }

    #[test]
    fn test_empty_sorts_lowest() {
        assert_eq!(compare("", "0"), Ordering::Less);
        assert_eq!(compare("0~", ""), Ordering::Greater);
        assert_eq!(compare("", ""), Ordering::Equal);
        assert!(!is_newer("", ""));
    }

    #[test]
    fn test_total_order() {
        let versions = [
            "", "1.0", "1.0~rc1", "1:0.9", "1.0-1", "1.0-1b1", "1.0-1+tanglu1", "2.0",
            "1.0+b1", "0:1.0",
        ];
        for a in &versions {
            assert_eq!(compare(a, a), Ordering::Equal);
            for b in &versions {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{} {}", a, b);
                for c in &versions {
                    if compare(a, b) != Ordering::Greater && compare(b, c) != Ordering::Greater {
                        assert_ne!(compare(a, c), Ordering::Greater, "{} {} {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_strip_epoch() {
        assert_eq!(strip_epoch("1:2.0-1"), "2.0-1");
        assert_eq!(strip_epoch("2.0-1"), "2.0-1");
        assert_eq!(strip_epoch("2.0:1-1"), "2.0:1-1");
        assert_eq!(strip_epoch(""), "");
    }

    #[test]
    fn test_local_marker() {
        assert!(has_local_marker("1.0-1+localdistro1", "localdistro"));
        assert!(has_local_marker("1.0-0Tanglu2", "tanglu"));
        assert!(!has_local_marker("1.0-1", "tanglu"));
        assert!(!has_local_marker("1.0-1", ""));
    }

    #[test]
    fn test_rebuild_suffix() {
        assert_eq!(without_rebuild_suffix("1.0-1b2"), "1.0-1");
        assert_eq!(without_rebuild_suffix("1:1.0-1b12"), "1:1.0-1");
        assert_eq!(without_rebuild_suffix("1.0-1"), "1.0-1");
        assert_eq!(without_rebuild_suffix("2.0b1"), "2.0b1");
        assert_eq!(without_rebuild_suffix("2.0+b3"), "2.0");
        assert_eq!(without_rebuild_suffix("1.0-b1"), "1.0-b1");
        assert_eq!(RebuildSuffix::parse("3.2-0tanglu1b4").counter, Some(4));
    }

    #[test]
    fn test_bump_rebuild() {
        assert_eq!(bump_rebuild("1.0-1"), "1.0-1b1");
        assert_eq!(bump_rebuild("1.0-1b1"), "1.0-1b2");
        assert_eq!(bump_rebuild("2:1.0-1b9"), "2:1.0-1b10");
        assert_eq!(bump_rebuild("1.0"), "1.0+b1");
        assert_eq!(bump_rebuild("1.0+b1"), "1.0+b2");
        assert!(is_newer(&bump_rebuild("1.0-1"), "1.0-1"));
        assert!(is_newer(&bump_rebuild("1.0"), "1.0"));
    }
}
