//! Interpretation of dependency solver reports.
//!
//! The solver (`dose-debcheck` or `dose-builddebcheck`) is run as a
//! subprocess. Its YAML report is parsed into typed entries at the boundary
//! and turned into [`BrokenPackageFact`]s; nothing downstream sees raw YAML.

use crate::layout::resolve_index;
use crate::{Error, Result};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Flags passed to the solver on every invocation.
const SOLVER_FLAGS: &[&str] = &["--quiet", "-e", "-f", "--summary"];

/// Top-level solver document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverReport {
    #[serde(default)]
    pub report: Option<Vec<ReportEntry>>,
}

/// Verdict for one package.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportEntry {
    pub package: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub status: String,
    #[serde(default)]
    pub reasons: Vec<ReportReason>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportReason {
    #[serde(default)]
    pub missing: Option<MissingReason>,
    #[serde(default)]
    pub conflict: Option<ConflictReason>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MissingReason {
    pub pkg: MissingPackage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MissingPackage {
    pub package: Option<String>,
    #[serde(rename = "unsat-dependency")]
    pub unsat_dependency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictReason {
    pub pkg1: ConflictPackage,
    #[serde(default)]
    pub pkg2: Option<ConflictPackage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictPackage {
    pub package: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "unsat-conflict", default)]
    pub unsat_conflict: Option<String>,
}

/// Classification of why a package is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokenReasonKind {
    MissingDependency,
    Conflict,
    Unknown,
}

/// First cause the solver gave for a broken package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrokenReason {
    MissingDependency {
        dependency: String,
    },
    Conflict {
        package: String,
        version: Option<String>,
        other: Option<String>,
        unsat_conflict: Option<String>,
    },
    Unknown,
}

impl BrokenReason {
    pub fn kind(&self) -> BrokenReasonKind {
        match self {
            BrokenReason::MissingDependency { .. } => BrokenReasonKind::MissingDependency,
            BrokenReason::Conflict { .. } => BrokenReasonKind::Conflict,
            BrokenReason::Unknown => BrokenReasonKind::Unknown,
        }
    }

    /// Solver identifier of the unsatisfied dependency or conflicting pair.
    pub fn identifier(&self) -> String {
        match self {
            BrokenReason::MissingDependency { dependency } => dependency.clone(),
            BrokenReason::Conflict {
                package,
                other: Some(other),
                ..
            } => format!("{} {}", package, other),
            BrokenReason::Conflict {
                package,
                unsat_conflict,
                ..
            } => unsat_conflict.clone().unwrap_or_else(|| package.clone()),
            BrokenReason::Unknown => String::new(),
        }
    }

    /// One-line summary used when a sync is blocked on build dependencies.
    pub fn describe(&self) -> String {
        match self {
            BrokenReason::MissingDependency { dependency } => {
                format!("Unsat dependency {}", dependency)
            }
            BrokenReason::Conflict {
                package,
                other: Some(other),
                ..
            } => format!("Conflict between {} and {}", package, other),
            BrokenReason::Conflict {
                package, version, ..
            } => format!(
                "Conflict involving {} ({})",
                package,
                version.as_deref().unwrap_or("?")
            ),
            BrokenReason::Unknown => "Unknown problem".to_string(),
        }
    }

    fn from_report(reason: Option<&ReportReason>) -> Self {
        let Some(reason) = reason else {
            return BrokenReason::Unknown;
        };
        if let Some(missing) = &reason.missing {
            return BrokenReason::MissingDependency {
                dependency: decode(
                    missing
                        .pkg
                        .unsat_dependency
                        .as_deref()
                        .or(missing.pkg.package.as_deref())
                        .unwrap_or_default(),
                ),
            };
        }
        if let Some(conflict) = &reason.conflict {
            return BrokenReason::Conflict {
                package: decode(&conflict.pkg1.package),
                version: conflict.pkg1.version.as_deref().map(decode),
                other: conflict.pkg2.as_ref().map(|p| decode(&p.package)),
                unsat_conflict: conflict.pkg1.unsat_conflict.as_deref().map(decode),
            };
        }
        BrokenReason::Unknown
    }
}

/// A package the solver judged broken on one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenPackageFact {
    pub package_name: String,
    pub version: String,
    /// Architecture the solver was run for.
    pub architecture: String,
    pub reason_kind: BrokenReasonKind,
    /// Solver identifier of the unsatisfied dependency or conflicting pair.
    pub reason_detail: String,
    pub reason: BrokenReason,
    /// Every architecture the package is broken on, `architecture` first.
    pub architectures: Vec<String>,
}

impl BrokenPackageFact {
    fn new(name: String, version: String, architecture: &str, reason: BrokenReason) -> Self {
        Self {
            package_name: name,
            version,
            architecture: architecture.to_string(),
            reason_kind: reason.kind(),
            reason_detail: reason.identifier(),
            reason,
            architectures: vec![architecture.to_string()],
        }
    }
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Recover `(name, version)` from a solver identifier such as `src%3afoo`,
/// `foo (= 1.0-1)` or `src:foo (= 1:2.0)`.
pub fn decode_identifier(identifier: &str) -> (String, Option<String>) {
    let decoded = decode(identifier);
    let trimmed = decoded.trim();
    let trimmed = trimmed.strip_prefix("src:").unwrap_or(trimmed);
    match trimmed.split_once('(') {
        Some((name, rest)) => {
            let version = rest
                .trim()
                .trim_end_matches(')')
                .trim()
                .trim_start_matches('=')
                .trim();
            let version = (!version.is_empty()).then(|| version.to_string());
            (name.trim().to_string(), version)
        }
        None => (trimmed.to_string(), None),
    }
}

/// Parse a solver YAML document.
pub fn parse_report(yaml: &str) -> Result<SolverReport> {
    if yaml.trim().is_empty() {
        return Ok(SolverReport::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// Broken packages listed in a report, keyed by source package.
///
/// The `source` field names the source package of a binary and wins over the
/// `package` field; entries without a recoverable version are dropped.
pub fn broken_facts(report: &SolverReport, architecture: &str) -> Vec<BrokenPackageFact> {
    let Some(entries) = &report.report else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|entry| entry.status != "ok")
        .filter_map(|entry| {
            let from_source = entry
                .source
                .as_deref()
                .map(decode_identifier)
                .filter(|(_, version)| version.is_some());
            let (name, version) = match from_source {
                Some((name, version)) => (name, version),
                None => {
                    let (name, version) = decode_identifier(&entry.package);
                    (name, version.or_else(|| entry.version.as_deref().map(decode)))
                }
            };
            let Some(version) = version else {
                debug!("Ignoring report entry without version: {}", entry.package);
                return None;
            };
            Some(BrokenPackageFact::new(
                name,
                version,
                architecture,
                BrokenReason::from_report(entry.reasons.first()),
            ))
        })
        .collect()
}

/// Fold facts for the same package into one, collecting the architectures it
/// is broken on. The first fact seen for a package provides its reason; each
/// further architecture is appended to its `reason_detail` as `, <arch>`.
pub fn merge_architectures<I: IntoIterator<Item = BrokenPackageFact>>(
    facts: I,
) -> Vec<BrokenPackageFact> {
    let mut merged: Vec<BrokenPackageFact> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for fact in facts {
        match positions.get(&fact.package_name) {
            Some(&i) => {
                let existing = &mut merged[i];
                if !existing.architectures.contains(&fact.architecture) {
                    existing.reason_detail.push_str(", ");
                    existing.reason_detail.push_str(&fact.architecture);
                    existing.architectures.push(fact.architecture);
                }
            }
            None => {
                positions.insert(fact.package_name.clone(), merged.len());
                merged.push(fact);
            }
        }
    }
    merged
}

/// Build-dependency facts of one upstream suite, looked up per source
/// package and version.
#[derive(Debug, Clone, Default)]
pub struct BuildCheck {
    facts: HashMap<(String, String), BrokenPackageFact>,
}

impl BuildCheck {
    pub fn new<I: IntoIterator<Item = BrokenPackageFact>>(facts: I) -> Self {
        Self {
            facts: facts
                .into_iter()
                .map(|f| ((f.package_name.clone(), f.version.clone()), f))
                .collect(),
        }
    }

    pub fn get(&self, name: &str, version: &str) -> Option<&BrokenPackageFact> {
        self.facts.get(&(name.to_string(), version.to_string()))
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Runs a solver binary with a timeout.
#[derive(Debug, Clone)]
pub struct Solver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Solver {
    pub fn new<S: Into<String>>(program: S, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Add arguments passed before the standard flags.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the solver over `index_files` for `architecture`.
    ///
    /// A non-zero exit is expected when broken packages were found; it is
    /// only an error when the output cannot be parsed.
    pub async fn check(
        &self,
        index_files: &[PathBuf],
        architecture: &str,
    ) -> Result<Vec<BrokenPackageFact>> {
        let existing: Vec<PathBuf> = index_files
            .iter()
            .filter_map(|path| {
                let found = resolve_index(path);
                if found.is_none() {
                    debug!("Leaving missing index {} out of solver run", path.display());
                }
                found
            })
            .collect();
        if existing.is_empty() {
            return Err(Error::solver(format!(
                "no index files available for {}",
                architecture
            )));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(SOLVER_FLAGS)
            .arg(format!("--deb-native-arch={}", architecture))
            .args(existing.iter().map(|p| p.as_os_str()));
        let report = self.run(command).await?;
        let facts = broken_facts(&report, architecture);
        info!(
            "{} reports {} broken packages on {}",
            self.program,
            facts.len(),
            architecture
        );
        Ok(facts)
    }

    /// Run the build-dependency variant: `sources_index` is checked against
    /// the binary `index_files`.
    pub async fn build_check(
        &self,
        index_files: &[PathBuf],
        sources_index: &Path,
        architecture: &str,
    ) -> Result<Vec<BrokenPackageFact>> {
        let Some(sources_index) = resolve_index(sources_index) else {
            return Err(Error::solver(format!(
                "sources index {} does not exist",
                sources_index.display()
            )));
        };
        let mut files: Vec<PathBuf> = index_files.to_vec();
        files.push(sources_index);
        self.check(&files, architecture).await
    }

    async fn run(&self, mut command: Command) -> Result<SolverReport> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("Running {:?}", command);

        let child = command
            .spawn()
            .map_err(|e| Error::solver(format!("failed to spawn {}: {}", self.program, e)))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::solver(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::solver(format!("{}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("{}: {}", self.program, stderr.trim());
        }

        match parse_report(&stdout) {
            Ok(report) if output.status.success() || report.report.is_some() => Ok(report),
            Ok(_) => Err(Error::solver(format!(
                "{} exited with {} without a report",
                self.program, output.status
            ))),
            Err(e) => Err(Error::solver(format!(
                "{} exited with {} and an unreadable report: {}",
                self.program, output.status, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"
report:
  - package: libfoo1
    version: 1.0-1
    architecture: amd64
    source: foo (= 1.0-1)
    status: broken
    reasons:
      - missing:
          pkg:
            package: libfoo1
            version: 1.0-1
            architecture: amd64
            unsat-dependency: libbar2 (>= 2)
  - package: baz-utils
    version: 2:3.0-1
    architecture: amd64
    source: src%3abaz (= 2%3a3.0-1)
    status: broken
    reasons:
      - conflict:
          pkg1:
            package: baz-utils
            version: 2:3.0-1
            unsat-conflict: qux (<< 1)
          pkg2:
            package: qux
            version: 0.5-1
  - package: fine
    version: 1
    status: ok
"#;

    #[test]
    fn test_decode_identifier() {
        assert_eq!(decode_identifier("src%3afoo"), ("foo".to_string(), None));
        assert_eq!(
            decode_identifier("foo (= 1.0-1)"),
            ("foo".to_string(), Some("1.0-1".to_string()))
        );
        assert_eq!(
            decode_identifier("src:bar (= 1%3a2.0)"),
            ("bar".to_string(), Some("1:2.0".to_string()))
        );
    }

    #[test]
    fn test_broken_facts() {
        let report = parse_report(REPORT).unwrap();
        let facts = broken_facts(&report, "amd64");
        assert_eq!(facts.len(), 2);

        assert_eq!(facts[0].package_name, "foo");
        assert_eq!(facts[0].version, "1.0-1");
        assert_eq!(facts[0].reason_kind, BrokenReasonKind::MissingDependency);
        assert_eq!(facts[0].reason_detail, "libbar2 (>= 2)");
        assert_eq!(facts[0].reason.describe(), "Unsat dependency libbar2 (>= 2)");

        assert_eq!(facts[1].package_name, "baz");
        assert_eq!(facts[1].version, "2:3.0-1");
        assert_eq!(facts[1].reason_kind, BrokenReasonKind::Conflict);
        assert_eq!(
            facts[1].reason.describe(),
            "Conflict between baz-utils and qux"
        );
    }

    #[test]
    fn test_build_check_entries() {
        let report = parse_report(
            "report:\n  - package: src%3afoo\n    version: 1.0-1\n    status: broken\n    reasons:\n      - conflict:\n          pkg1:\n            package: gcc-4.8\n            version: 4.8.2-1\n",
        )
        .unwrap();
        let facts = broken_facts(&report, "amd64");
        assert_eq!(facts[0].package_name, "foo");
        assert_eq!(facts[0].version, "1.0-1");
        assert_eq!(
            facts[0].reason.describe(),
            "Conflict involving gcc-4.8 (4.8.2-1)"
        );

        let check = BuildCheck::new(facts);
        assert!(check.get("foo", "1.0-1").is_some());
        assert!(check.get("foo", "1.0-2").is_none());
    }

    #[test]
    fn test_first_reason_classifies() {
        let report = parse_report(
            "report:\n  - package: a\n    version: 1\n    status: broken\n    reasons:\n      - {}\n      - missing:\n          pkg:\n            unsat-dependency: b\n",
        )
        .unwrap();
        let facts = broken_facts(&report, "i386");
        assert_eq!(facts[0].reason_kind, BrokenReasonKind::Unknown);
        assert_eq!(facts[0].reason.describe(), "Unknown problem");
    }

    #[test]
    fn test_empty_report() {
        assert!(broken_facts(&parse_report("").unwrap(), "amd64").is_empty());
        assert!(broken_facts(&parse_report("report: null\n").unwrap(), "amd64").is_empty());
    }

    #[test]
    fn test_merge_architectures() {
        let report = parse_report(REPORT).unwrap();
        let mut facts = broken_facts(&report, "amd64");
        facts.extend(broken_facts(&report, "i386"));
        facts.extend(broken_facts(&report, "i386"));

        let merged = merge_architectures(facts);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].architecture, "amd64");
        assert_eq!(merged[0].architectures, vec!["amd64", "i386"]);
        assert_eq!(merged[0].reason_detail, "libbar2 (>= 2), i386");
        assert_eq!(merged[1].reason_detail, "baz-utils qux, i386");
    }

    #[test]
    fn test_merge_keeps_single_arch_detail() {
        let report = parse_report(REPORT).unwrap();
        let merged = merge_architectures(broken_facts(&report, "armhf"));
        assert_eq!(merged[0].reason_detail, "libbar2 (>= 2)");
        assert_eq!(merged[0].architectures, vec!["armhf"]);
    }

    #[cfg(unix)]
    fn fake_solver(dir: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-debcheck");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_with_report_is_result() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("Packages.gz");
        std::fs::write(&index, b"").unwrap();
        let report = dir.path().join("report.yaml");
        std::fs::write(&report, REPORT).unwrap();
        let program = fake_solver(dir.path(), &format!("cat {}\nexit 1", report.display()));

        let solver = Solver::new(program, Duration::from_secs(30));
        let facts = solver.check(&[index], "amd64").await.unwrap();
        assert_eq!(facts.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_without_report_fails() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("Packages.gz");
        std::fs::write(&index, b"").unwrap();
        let program = fake_solver(dir.path(), "echo oops >&2\nexit 64");

        let solver = Solver::new(program, Duration::from_secs(30));
        let err = solver.check(&[index], "amd64").await.unwrap_err();
        assert!(matches!(err, Error::SolverInvocationFailed(_)));
        assert!(!err.is_fatal_for_run());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_report_is_solver_failure() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("Packages.gz");
        std::fs::write(&index, b"").unwrap();
        let program = fake_solver(dir.path(), "echo 'report: [unterminated'\nexit 0");

        let solver = Solver::new(program, Duration::from_secs(30));
        let err = solver.check(&[index], "amd64").await.unwrap_err();
        assert!(matches!(err, Error::SolverInvocationFailed(_)));
        assert!(!err.is_fatal_for_run());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("Packages.gz");
        std::fs::write(&index, b"").unwrap();
        let program = fake_solver(dir.path(), "sleep 5");

        let solver = Solver::new(program, Duration::from_millis(200));
        let err = solver.check(&[index], "amd64").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_indices() {
        let solver = Solver::new("dose-debcheck", Duration::from_secs(1));
        let err = solver
            .check(&[PathBuf::from("/nonexistent/Packages.gz")], "amd64")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SolverInvocationFailed(_)));
    }
}
