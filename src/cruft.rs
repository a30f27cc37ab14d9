//! Detection and removal of cruft: local packages that were removed upstream
//! or can no longer be installed.

use crate::catalog::{Catalog, PackageRecord};
use crate::config::Config;
use crate::context::RunContext;
use crate::hints::write_removal_hints;
use crate::installability::{merge_architectures, BrokenPackageFact, BrokenReason, Solver};
use crate::layout::ArchiveLayout;
use crate::removals::RemovalNotice;
use crate::report::write_json_report;
use crate::tool::ArchiveTool;
use crate::version::{compare, has_local_marker, without_rebuild_suffix};
use crate::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Components of the upstream archive.
pub const UPSTREAM_COMPONENTS: &[&str] = &["main", "contrib", "non-free"];

/// A local package that should be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalCandidate {
    pub suite: String,
    pub package_name: String,
    pub local_version: String,
    pub reason: String,
}

impl std::fmt::Display for RemovalCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.package_name, self.local_version)
    }
}

/// Which removal notices are acted upon.
#[derive(Debug, Clone)]
pub struct CruftPolicy {
    pub distro_name: String,
    /// Upstream suites whose removals are ignored.
    pub ignored_suites: Vec<String>,
    /// Removal reasons that only concern upstream.
    pub ignored_reasons: Vec<Regex>,
}

impl CruftPolicy {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            distro_name: config.general.distro_name.clone(),
            ignored_suites: config.cruft.ignored_suites.clone(),
            ignored_reasons: config.ignored_reason_patterns()?,
        })
    }

    fn ignores(&self, notice: &RemovalNotice) -> bool {
        self.ignored_suites.iter().any(|s| *s == notice.suite)
            || self.ignored_reasons.iter().any(|r| r.is_match(&notice.reason))
    }
}

/// Local packages of `local_suite` that upstream removed.
///
/// Locally modified packages are kept, as are packages whose version, rebuild
/// counter aside, is newer than the removed one. A package listed by several
/// notices is reported once.
pub fn upstream_removal_cruft(
    catalog: &Catalog,
    notices: &[RemovalNotice],
    local_suite: &str,
    policy: &CruftPolicy,
) -> Vec<RemovalCandidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for notice in notices {
        if policy.ignores(notice) {
            continue;
        }
        let Some(local) = catalog.get(&notice.package_name) else {
            continue;
        };
        if has_local_marker(&local.version, &policy.distro_name) {
            debug!(
                "Keeping {} {}: contains local modifications",
                local.name, local.version
            );
            continue;
        }
        if compare(without_rebuild_suffix(&local.version), &notice.version) == Ordering::Greater {
            debug!(
                "Keeping {} {}: newer than removed {}",
                local.name, local.version, notice.version
            );
            continue;
        }
        if !seen.insert(local.name.clone()) {
            continue;
        }
        candidates.push(RemovalCandidate {
            suite: local_suite.to_string(),
            package_name: local.name.clone(),
            local_version: local.version.clone(),
            reason: notice.reason.clone(),
        });
    }
    candidates
}

/// Human-readable removal reason for a package the solver found broken.
pub fn uninstallability_reason(fact: &BrokenPackageFact) -> String {
    let mut reason = "Binary packages with broken dependencies.".to_string();
    match &fact.reason {
        BrokenReason::MissingDependency { dependency } => {
            reason.push_str(&format!("\nMissing dependency: {}", dependency));
        }
        BrokenReason::Conflict {
            package,
            unsat_conflict,
            ..
        } => {
            reason.push_str(&format!(
                "\nConflicting packages. '{}' is involved.",
                unsat_conflict.as_deref().unwrap_or(package)
            ));
        }
        BrokenReason::Unknown => {}
    }
    reason.push_str(&format!("\nBroken on arch: {}", fact.architectures.join(", ")));
    reason
}

/// One removal candidate per broken package, over all architectures.
pub fn uninstallable_cruft<I>(facts: I, suite: &str) -> Vec<RemovalCandidate>
where
    I: IntoIterator<Item = BrokenPackageFact>,
{
    merge_architectures(facts)
        .into_iter()
        .map(|fact| RemovalCandidate {
            suite: suite.to_string(),
            reason: uninstallability_reason(&fact),
            package_name: fact.package_name,
            local_version: fact.version,
        })
        .collect()
}

/// Run the installability checker for every architecture of `suite`.
///
/// An architecture whose solver run fails is skipped; the error is returned
/// only when no architecture could be checked.
pub async fn find_uninstallable(
    solver: &Solver,
    layout: &ArchiveLayout,
    suite: &str,
    overlay: Option<&str>,
    components: &[String],
    archs: &[String],
) -> Result<Vec<BrokenPackageFact>> {
    let mut facts = Vec::new();
    let mut checked = 0;
    let mut last_error = None;
    for arch in archs {
        let mut indices: Vec<PathBuf> = Vec::new();
        for component in components {
            for index in layout.debcheck_component_indices(suite, overlay, component, arch) {
                if !indices.contains(&index) {
                    indices.push(index);
                }
            }
        }
        match solver.check(&indices, arch).await {
            Ok(broken) => {
                checked += 1;
                facts.extend(broken);
            }
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                error!("Installability check of {} on {} failed: {}", suite, arch, e);
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) if checked == 0 => Err(e),
        _ => Ok(facts),
    }
}

/// Local packages that upstream does not carry at all, leaving out the
/// packages native to the distribution.
pub fn packages_not_in_upstream<'a>(
    local: &'a Catalog,
    upstream: &Catalog,
    distro_name: &str,
) -> Vec<&'a PackageRecord> {
    let distro = distro_name.to_lowercase();
    let native_marker = format!("-0{}", distro);
    local
        .iter()
        .filter(|record| !upstream.contains(&record.name))
        .filter(|record| {
            !record.version.to_lowercase().contains(&native_marker)
                && !record.name.contains(&distro)
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct NotInUpstreamEntry {
    pub name: String,
    pub version: String,
    pub local_changes: bool,
    pub remove_hint: String,
}

#[derive(Debug, Serialize)]
pub struct NotInUpstreamReport {
    pub upstream_suite: String,
    pub import_freeze: bool,
    pub suites: BTreeMap<String, Vec<NotInUpstreamEntry>>,
}

/// Gather candidates for `suite`: upstream removals always, uninstallable
/// packages when asked to. A failing solver only loses the latter.
pub async fn collect_cruft(
    ctx: &RunContext,
    suite: &str,
    include_uninstallable: bool,
) -> Result<Vec<RemovalCandidate>> {
    let suite_config = ctx.suite_config(suite)?;
    let catalog = ctx.local_catalog(suite, &suite_config.components).await?;
    let policy = CruftPolicy::from_config(ctx.config())?;

    let mut candidates = upstream_removal_cruft(&catalog, ctx.removals().await?, suite, &policy);
    info!("{} packages in {} were removed upstream", candidates.len(), suite);

    if include_uninstallable {
        let result = find_uninstallable(
            &ctx.debcheck(),
            ctx.local_layout(),
            suite,
            ctx.config().overlay_suite(suite),
            &suite_config.components,
            &suite_config.archs,
        )
        .await;
        match result {
            Ok(facts) => {
                let broken = uninstallable_cruft(facts, suite);
                info!("{} packages in {} are uninstallable", broken.len(), suite);
                candidates.extend(broken);
            }
            Err(e) if !e.is_fatal_for_run() => {
                error!("Skipping installability check for {}: {}", suite, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(candidates)
}

/// Write the report of local packages missing upstream, for the devel and
/// staging suites.
pub async fn write_not_in_upstream_report(ctx: &RunContext) -> Result<PathBuf> {
    let config = ctx.config();
    let components: Vec<String> = UPSTREAM_COMPONENTS.iter().map(|c| c.to_string()).collect();
    let upstream = ctx
        .upstream_catalog(&config.sync.source_suite, &components)
        .await?;

    let mut suites = vec![config.archive.devel_suite.clone()];
    if let Some(staging) = &config.archive.staging_suite {
        if !suites.contains(staging) {
            suites.push(staging.clone());
        }
    }

    let mut report = NotInUpstreamReport {
        upstream_suite: config.sync.source_suite.clone(),
        import_freeze: !config.sync.enabled,
        suites: BTreeMap::new(),
    };
    for suite in suites {
        let suite_config = ctx.suite_config(&suite)?;
        let local = ctx.local_catalog(&suite, &suite_config.components).await?;
        let entries = packages_not_in_upstream(&local, &upstream, ctx.distro_name())
            .into_iter()
            .map(|record| NotInUpstreamEntry {
                name: record.name.clone(),
                version: record.version.clone(),
                local_changes: has_local_marker(&record.version, ctx.distro_name()),
                remove_hint: format!("remove {}/{}", record.name, record.version),
            })
            .collect::<Vec<_>>();
        info!("{} packages in {} are not in upstream", entries.len(), suite);
        report.suites.insert(suite, entries);
    }

    write_json_report(&config.general.report_dir, "cruft-report", &report)
}

/// How removal candidates are applied.
pub enum RemovalMode {
    /// Print the candidates and touch nothing.
    DryRun,
    /// Write a hints file for the migration tool.
    Hints(PathBuf),
    /// Remove through the archive tool.
    Tool(Arc<dyn ArchiveTool>),
}

/// Result of applying candidates through the archive tool.
#[derive(Debug, Default)]
pub struct RemovalSummary {
    pub removed: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

pub struct CruftRemover {
    mode: RemovalMode,
    distro_name: String,
    staging_suite: Option<String>,
}

impl CruftRemover {
    pub fn new(mode: RemovalMode, config: &Config) -> Self {
        Self {
            mode,
            distro_name: config.general.distro_name.clone(),
            staging_suite: config.archive.staging_suite.clone(),
        }
    }

    pub async fn apply(&self, candidates: &[RemovalCandidate]) -> Result<RemovalSummary> {
        let mut summary = RemovalSummary::default();
        match &self.mode {
            RemovalMode::DryRun => {
                for candidate in candidates {
                    println!("----");
                    println!("{}", candidate.suite);
                    println!("{} - {}", candidate.package_name, candidate.local_version);
                    println!("-");
                    println!("{}", candidate.reason);
                }
                println!("#");
                println!("End of dry-run. Packages flagged for removal are shown above.");
            }
            RemovalMode::Hints(path) => {
                write_removal_hints(
                    path,
                    candidates,
                    &self.distro_name,
                    self.staging_suite.as_deref(),
                )?;
                info!(
                    "Wrote {} removal hints to {}",
                    candidates.len(),
                    path.display()
                );
            }
            RemovalMode::Tool(tool) => {
                for candidate in candidates {
                    match tool
                        .remove(&candidate.suite, &candidate.package_name, &candidate.reason)
                        .await
                    {
                        Ok(()) => {
                            info!("Removed: {}", candidate);
                            summary.removed.push(candidate.to_string());
                        }
                        Err(e) => {
                            warn!("Failed to remove {}: {}", candidate, e);
                            summary.failed.push((candidate.to_string(), e));
                        }
                    }
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installability::{broken_facts, parse_report};
    use crate::test_utils::record;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    fn policy() -> CruftPolicy {
        CruftPolicy {
            distro_name: "tanglu".to_string(),
            ignored_suites: vec!["experimental".to_string()],
            ignored_reasons: vec![Regex::new("^NBS").unwrap()],
        }
    }

    fn notice(suite: &str, name: &str, version: &str, reason: &str) -> RemovalNotice {
        RemovalNotice {
            suite: suite.to_string(),
            package_name: name.to_string(),
            version: version.to_string(),
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_removed_upstream() {
        let catalog: Catalog = vec![record("foo", "1.2-1")].into_iter().collect();
        let candidates = upstream_removal_cruft(
            &catalog,
            &[notice("unstable", "foo", "1.2-1", "RoQA")],
            "devel",
            &policy(),
        );
        assert_eq!(
            candidates,
            vec![RemovalCandidate {
                suite: "devel".to_string(),
                package_name: "foo".to_string(),
                local_version: "1.2-1".to_string(),
                reason: "RoQA".to_string(),
            }]
        );
    }

    #[test]
    fn test_local_modifications_kept() {
        let catalog: Catalog = vec![record("foo", "1.2-1tanglu1")].into_iter().collect();
        assert!(upstream_removal_cruft(
            &catalog,
            &[notice("unstable", "foo", "1.2-1tanglu1", "RoQA")],
            "devel",
            &policy(),
        )
        .is_empty());
    }

    #[test]
    fn test_rebuild_suffix_ignored() {
        let catalog: Catalog = vec![record("foo", "1.2-1b2"), record("bar", "2.0-1")]
            .into_iter()
            .collect();
        let candidates = upstream_removal_cruft(
            &catalog,
            &[
                notice("unstable", "foo", "1.2-1", "RoQA"),
                notice("unstable", "bar", "1.0-1", "RoM"),
            ],
            "devel",
            &policy(),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].package_name, "foo");
        assert_eq!(candidates[0].local_version, "1.2-1b2");
    }

    #[test]
    fn test_ignored_notices() {
        let catalog: Catalog = vec![record("foo", "1.0-1")].into_iter().collect();
        let candidates = upstream_removal_cruft(
            &catalog,
            &[
                notice("experimental", "foo", "1.0-1", "RoM"),
                notice("unstable", "foo", "1.0-1", "NBS; no longer built"),
                notice("unstable", "foo", "1.0-1", "RoQA"),
                notice("testing", "foo", "1.0-1", "RoQA"),
            ],
            "devel",
            &policy(),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reason, "RoQA");
    }

    fn facts(arch: &str) -> Vec<BrokenPackageFact> {
        let yaml = r#"
report:
  - package: libfoo1
    version: 1.0-1
    source: foo (= 1.0-1)
    status: broken
    reasons:
      - missing:
          pkg:
            unsat-dependency: libbar2 (>= 2)
  - package: baz
    version: 2%3a1.0-1
    source: src%3abaz (= 2%3a1.0-1)
    status: broken
    reasons:
      - conflict:
          pkg1:
            package: baz
            unsat-conflict: qux (<< 1)
          pkg2:
            package: qux
"#;
        broken_facts(&parse_report(yaml).unwrap(), arch)
    }

    #[test]
    fn test_uninstallable_cruft() {
        let mut all = facts("amd64");
        all.extend(facts("i386"));
        let candidates = uninstallable_cruft(all, "staging");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].suite, "staging");
        assert_eq!(
            candidates[0].reason,
            "Binary packages with broken dependencies.\nMissing dependency: libbar2 (>= 2)\nBroken on arch: amd64, i386"
        );
        assert_eq!(candidates[1].package_name, "baz");
        assert_eq!(candidates[1].local_version, "2:1.0-1");
        assert_eq!(
            candidates[1].reason,
            "Binary packages with broken dependencies.\nConflicting packages. 'qux (<< 1)' is involved.\nBroken on arch: amd64, i386"
        );
    }

    #[cfg(unix)]
    fn fake_solver(dir: &Path, script: &str) -> Solver {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-debcheck");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Solver::new(path.display().to_string(), std::time::Duration::from_secs(30))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_find_uninstallable_continues_past_failed_arch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(dir.path().join("archive"), "tanglu");
        for arch in ["amd64", "i386"] {
            crate::test_utils::write_index(&layout.packages_index("devel", "main", arch), "");
        }
        let report = dir.path().join("report.yaml");
        std::fs::write(
            &report,
            "report:\n  - package: libfoo1\n    version: 1.0-1\n    source: foo (= 1.0-1)\n    status: broken\n",
        )
        .unwrap();
        let solver = fake_solver(
            dir.path(),
            &format!(
                "case \"$*\" in *native-arch=i386*) echo crashed >&2; exit 64;; esac\ncat {}\nexit 1",
                report.display()
            ),
        );
        let archs = vec!["i386".to_string(), "amd64".to_string()];
        let components = vec!["main".to_string()];

        let facts = find_uninstallable(&solver, &layout, "devel", None, &components, &archs)
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].package_name, "foo");
        assert_eq!(facts[0].architecture, "amd64");

        let err = find_uninstallable(&solver, &layout, "devel", None, &components, &archs[..1])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SolverInvocationFailed(_)));
    }

    #[test]
    fn test_packages_not_in_upstream() {
        let local: Catalog = vec![
            record("foo", "1.0-1"),
            record("gone", "1.0-1"),
            record("tanglu-meta", "1.0"),
            record("artwork", "2.0-0tanglu1"),
        ]
        .into_iter()
        .collect();
        let upstream: Catalog = vec![record("foo", "1.0-2")].into_iter().collect();
        let missing: Vec<&str> = packages_not_in_upstream(&local, &upstream, "Tanglu")
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(missing, vec!["gone"]);
    }

    #[derive(Default)]
    struct RecordingTool {
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveTool for RecordingTool {
        async fn import(
            &self,
            _suite: &str,
            _component: &str,
            _dsc: &Path,
        ) -> Result<crate::tool::ImportOutcome> {
            unreachable!()
        }

        async fn remove(&self, suite: &str, name: &str, _reason: &str) -> Result<()> {
            if name == "stuck" {
                return Err(Error::import_failed(name, "rejected"));
            }
            self.removed
                .lock()
                .unwrap()
                .push(format!("{}:{}", suite, name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tool_removal_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::test_utils::test_config(dir.path());
        let tool = Arc::new(RecordingTool::default());
        let remover = CruftRemover::new(RemovalMode::Tool(tool.clone()), &config);

        let candidates: Vec<RemovalCandidate> = ["a", "stuck", "b"]
            .iter()
            .map(|name| RemovalCandidate {
                suite: "devel".to_string(),
                package_name: name.to_string(),
                local_version: "1".to_string(),
                reason: "RoQA".to_string(),
            })
            .collect();
        let summary = remover.apply(&candidates).await.unwrap();
        assert_eq!(summary.removed, vec!["a/1", "b/1"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(*tool.removed.lock().unwrap(), vec!["devel:a", "devel:b"]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::test_utils::test_config(dir.path());
        let remover = CruftRemover::new(RemovalMode::DryRun, &config);
        let summary = remover
            .apply(&[RemovalCandidate {
                suite: "devel".to_string(),
                package_name: "foo".to_string(),
                local_version: "1".to_string(),
                reason: "RoQA".to_string(),
            }])
            .await
            .unwrap();
        assert!(summary.removed.is_empty());
        assert!(!dir.path().join("hints.txt").exists());
    }
}
