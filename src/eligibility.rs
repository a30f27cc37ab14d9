//! Sync eligibility policy.
//!
//! [`SyncPolicy::decide`] is a pure function of its inputs. The rules are
//! applied in a fixed order and the first one that matches decides; `force`
//! only lifts the local-modification and build-dependency rules.

use crate::catalog::PackageRecord;
use crate::installability::BrokenPackageFact;
use crate::version::{compare, has_local_marker};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Why a sync was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncBlockReason {
    Blacklisted,
    UnsupportedArchitecture,
    NotNewer,
    LocalModifications,
    Unbuildable,
}

impl SyncBlockReason {
    pub fn code(&self) -> &'static str {
        match self {
            SyncBlockReason::Blacklisted => "blacklisted",
            SyncBlockReason::UnsupportedArchitecture => "unsupported_architecture",
            SyncBlockReason::NotNewer => "not_newer",
            SyncBlockReason::LocalModifications => "local_modifications",
            SyncBlockReason::Unbuildable => "unbuildable",
        }
    }

    /// Whether a refusal for this reason needs someone to look at it, as
    /// opposed to simply being nothing to do.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            SyncBlockReason::LocalModifications | SyncBlockReason::Unbuildable
        )
    }
}

impl std::fmt::Display for SyncBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of the policy for one source/destination pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncDecision {
    pub allowed: bool,
    pub blocking_reason: Option<SyncBlockReason>,
    pub detail: Option<String>,
}

impl SyncDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            blocking_reason: None,
            detail: None,
        }
    }

    pub fn block(reason: SyncBlockReason, detail: Option<String>) -> Self {
        Self {
            allowed: false,
            blocking_reason: Some(reason),
            detail,
        }
    }
}

/// Whether a package declaring `archs` can be built on any of `supported`.
///
/// `all`, `any` and `linux-any` are buildable everywhere; `any-<arch>` and
/// plain arch names must name a supported architecture.
pub fn architectures_supported<'a, I>(archs: I, supported: &[String]) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    archs.into_iter().any(|arch| match arch.as_str() {
        "all" | "any" | "linux-any" => true,
        other => {
            let other = other.strip_prefix("any-").unwrap_or(other);
            supported.iter().any(|s| s == other)
        }
    })
}

/// Sync policy of one destination suite.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Architectures the destination suite builds for.
    pub supported_archs: Vec<String>,
    /// Marker identifying locally modified versions.
    pub distro_name: String,
}

impl SyncPolicy {
    pub fn new<S: Into<String>>(supported_archs: Vec<String>, distro_name: S) -> Self {
        Self {
            supported_archs,
            distro_name: distro_name.into(),
        }
    }

    /// Decide whether `src` may replace `dest` (or be imported fresh).
    ///
    /// `depwait` is the build-dependency fact for `src`, if any; it is only
    /// consulted when it names the same package and version.
    pub fn decide(
        &self,
        src: &PackageRecord,
        dest: Option<&PackageRecord>,
        blacklist: &BTreeSet<String>,
        force: bool,
        depwait: Option<&BrokenPackageFact>,
    ) -> SyncDecision {
        if blacklist.contains(&src.name) {
            return SyncDecision::block(SyncBlockReason::Blacklisted, None);
        }

        if !architectures_supported(&src.architectures, &self.supported_archs) {
            return SyncDecision::block(
                SyncBlockReason::UnsupportedArchitecture,
                Some(format!(
                    "only for {}",
                    src.architectures
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(" ")
                )),
            );
        }

        let Some(dest) = dest else {
            return SyncDecision::allow();
        };

        if compare(&dest.version, &src.version) != Ordering::Less {
            return SyncDecision::block(
                SyncBlockReason::NotNewer,
                Some(format!("{} >= {}", dest.version, src.version)),
            );
        }

        if !force && has_local_marker(&dest.version, &self.distro_name) {
            return SyncDecision::block(
                SyncBlockReason::LocalModifications,
                Some(format!(
                    "Package contains {}-specific modifications. It needs a manual merge.",
                    capitalize(&self.distro_name)
                )),
            );
        }

        if !force {
            if let Some(fact) = depwait
                .filter(|f| f.package_name == src.name && f.version == src.version)
            {
                return SyncDecision::block(
                    SyncBlockReason::Unbuildable,
                    Some(fact.reason.describe()),
                );
            }
        }

        SyncDecision::allow()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installability::{parse_report, broken_facts};
    use crate::test_utils::record;
    use maplit::btreeset;

    fn policy() -> SyncPolicy {
        SyncPolicy::new(vec!["amd64".to_string(), "i386".to_string()], "tanglu")
    }

    fn depwait(name: &str, version: &str) -> BrokenPackageFact {
        let yaml = format!(
            "report:\n  - package: src%3a{}\n    version: {}\n    status: broken\n    reasons:\n      - missing:\n          pkg:\n            unsat-dependency: libqt6-dev\n",
            name, version
        );
        broken_facts(&parse_report(&yaml).unwrap(), "amd64").remove(0)
    }

    #[test]
    fn test_new_package_allowed() {
        let decision = policy().decide(&record("bar", "2.0-1"), None, &btreeset! {}, false, None);
        assert_eq!(decision, SyncDecision::allow());
    }

    #[test]
    fn test_blacklist_beats_force() {
        let decision = policy().decide(
            &record("foo", "2.0-1"),
            Some(&record("foo", "1.0-1")),
            &btreeset! {"foo".to_string()},
            true,
            None,
        );
        assert!(!decision.allowed);
        assert_eq!(decision.blocking_reason, Some(SyncBlockReason::Blacklisted));
    }

    #[test]
    fn test_unsupported_architecture() {
        let src = record("fw", "1.0-1").with_architectures("armhf arm64");
        let decision = policy().decide(&src, None, &btreeset! {}, true, None);
        assert_eq!(
            decision.blocking_reason,
            Some(SyncBlockReason::UnsupportedArchitecture)
        );
        assert_eq!(decision.detail.as_deref(), Some("only for arm64 armhf"));
    }

    #[test]
    fn test_architecture_pseudo_values() {
        let supported = vec!["amd64".to_string()];
        for archs in ["all", "any", "linux-any", "any-amd64", "armhf amd64"] {
            let src = record("p", "1").with_architectures(archs);
            assert!(
                architectures_supported(&src.architectures, &supported),
                "{}",
                archs
            );
        }
        let src = record("p", "1").with_architectures("any-arm64");
        assert!(!architectures_supported(&src.architectures, &supported));
    }

    #[test]
    fn test_not_newer_on_equal_and_lower() {
        for dest in ["1.0-1", "1.0-2", "1:0.5-1"] {
            let decision = policy().decide(
                &record("foo", "1.0-1"),
                Some(&record("foo", dest)),
                &btreeset! {},
                true,
                None,
            );
            assert_eq!(decision.blocking_reason, Some(SyncBlockReason::NotNewer), "{}", dest);
        }
    }

    #[test]
    fn test_local_modifications() {
        let src = record("baz", "1.0-2");
        let dest = record("baz", "1.0-1tanglu1");
        let decision = policy().decide(&src, Some(&dest), &btreeset! {}, false, None);
        assert_eq!(
            decision.blocking_reason,
            Some(SyncBlockReason::LocalModifications)
        );
        assert_eq!(
            decision.detail.as_deref(),
            Some("Package contains Tanglu-specific modifications. It needs a manual merge.")
        );

        let forced = policy().decide(&src, Some(&dest), &btreeset! {}, true, None);
        assert!(forced.allowed);
    }

    #[test]
    fn test_unbuildable() {
        let src = record("qux", "3.0-1");
        let dest = record("qux", "2.0-1");
        let fact = depwait("qux", "3.0-1");

        let decision = policy().decide(&src, Some(&dest), &btreeset! {}, false, Some(&fact));
        assert_eq!(decision.blocking_reason, Some(SyncBlockReason::Unbuildable));
        assert_eq!(
            decision.detail.as_deref(),
            Some("Unsat dependency libqt6-dev")
        );

        let forced = policy().decide(&src, Some(&dest), &btreeset! {}, true, Some(&fact));
        assert!(forced.allowed);
    }

    #[test]
    fn test_depwait_for_other_version_ignored() {
        let src = record("qux", "3.0-2");
        let dest = record("qux", "2.0-1");
        let fact = depwait("qux", "3.0-1");
        let decision = policy().decide(&src, Some(&dest), &btreeset! {}, false, Some(&fact));
        assert!(decision.allowed);
    }

    #[test]
    fn test_local_modifications_precede_unbuildable() {
        let src = record("qux", "3.0-1");
        let dest = record("qux", "2.0-1tanglu2");
        let fact = depwait("qux", "3.0-1");
        let decision = policy().decide(&src, Some(&dest), &btreeset! {}, false, Some(&fact));
        assert_eq!(
            decision.blocking_reason,
            Some(SyncBlockReason::LocalModifications)
        );
    }

    #[test]
    fn test_block_reason_codes() {
        assert_eq!(SyncBlockReason::NotNewer.to_string(), "not_newer");
        assert!(SyncBlockReason::Unbuildable.needs_attention());
        assert!(!SyncBlockReason::Blacklisted.needs_attention());
        assert_eq!(
            serde_json::to_string(&SyncBlockReason::LocalModifications).unwrap(),
            "\"local_modifications\""
        );
    }
}
