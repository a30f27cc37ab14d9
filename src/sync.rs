//! Synchronization of upstream source packages into a local suite.

use crate::catalog::{Catalog, PackageRecord};
use crate::context::RunContext;
use crate::eligibility::{SyncBlockReason, SyncDecision, SyncPolicy};
use crate::hints::SyncHints;
use crate::installability::BuildCheck;
use crate::layout::ArchiveLayout;
use crate::report::write_json_report;
use crate::tool::{ArchiveTool, ImportOutcome};
use crate::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upstream suites loaded besides the configured source suite.
pub const UPSTREAM_SUITES: &[&str] = &["experimental", "unstable", "testing"];

/// Where packages come from and where they go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub source_suite: String,
    pub target_suite: String,
    pub component: String,
}

/// Package data a synchronizer works from.
#[derive(Debug, Default)]
pub struct SyncData {
    /// Upstream catalogs keyed by suite.
    pub upstream: BTreeMap<String, Catalog>,
    /// Catalog of the target suite.
    pub dest: Catalog,
    pub hints: SyncHints,
    /// Build-dependency facts keyed by upstream suite.
    pub build_checks: BTreeMap<String, BuildCheck>,
}

/// What happened to one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Imported,
    AlreadyInPool,
    /// Would have been imported, but this is a dry run.
    DryRun,
    /// Refused by the eligibility policy.
    Blocked(SyncDecision),
    /// Not present in the upstream suite.
    Missing,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Imported | SyncOutcome::AlreadyInPool | SyncOutcome::DryRun
        )
    }
}

/// Outcomes of a batch, in processing order.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub outcomes: Vec<(String, Result<SyncOutcome>)>,
}

impl BatchResult {
    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, r)| matches!(r, Ok(outcome) if outcome.is_success()))
    }

    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, r)| !matches!(r, Ok(outcome) if outcome.is_success()))
            .map(|(name, _)| name.as_str())
    }
}

/// A package that could not be synced and needs someone to look at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub name: String,
    pub dest_version: String,
    pub src_version: String,
    pub fail_type: SyncBlockReason,
    pub details: Option<String>,
}

/// Result of a full sync run.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub source_suite: String,
    pub target_suite: String,
    pub component: String,
    pub import_freeze: bool,
    pub failures: Vec<SyncFailure>,
    pub imported: Vec<String>,
    pub import_errors: Vec<String>,
}

pub struct Synchronizer {
    target: SyncTarget,
    data: SyncData,
    policy: SyncPolicy,
    mirror: ArchiveLayout,
    tool: Arc<dyn ArchiveTool>,
    sync_enabled: bool,
    dry_run: bool,
}

impl Synchronizer {
    pub fn new(
        target: SyncTarget,
        data: SyncData,
        policy: SyncPolicy,
        mirror: ArchiveLayout,
        tool: Arc<dyn ArchiveTool>,
    ) -> Self {
        Self {
            target,
            data,
            policy,
            mirror,
            tool,
            sync_enabled: true,
            dry_run: false,
        }
    }

    /// Hold back everything without an autosync override.
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Load catalogs, hints and build-dependency facts for `target`.
    ///
    /// Upstream suites other than the source suite are optional. A failing
    /// build-dependency check only disables that check.
    pub async fn initialize(
        ctx: &RunContext,
        target: SyncTarget,
        tool: Arc<dyn ArchiveTool>,
    ) -> Result<Self> {
        let config = ctx.config();
        let components = vec![target.component.clone()];
        let dest = ctx.local_catalog(&target.target_suite, &components).await?;
        let hints = SyncHints::load(config.sync.hints_dir.as_deref())?;

        let mut suites: Vec<String> = UPSTREAM_SUITES.iter().map(|s| s.to_string()).collect();
        if !suites.contains(&target.source_suite) {
            suites.push(target.source_suite.clone());
        }

        let mut upstream = BTreeMap::new();
        let mut build_checks = BTreeMap::new();
        for suite in suites {
            let catalog = match ctx.upstream_catalog(&suite, &components).await {
                Ok(catalog) => catalog,
                Err(e) if suite != target.source_suite => {
                    warn!("Upstream suite {} unavailable: {}", suite, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            upstream.insert(suite.clone(), catalog);

            if !config.sync.buildcheck_before_sync {
                continue;
            }
            let arch = &config.sync.buildcheck_arch;
            let indices = ctx.buildcheck_indices(&target.target_suite, &target.component, arch);
            let sources = ctx.upstream_layout().sources_index(&suite, &target.component);
            match ctx.builddebcheck().build_check(&indices, &sources, arch).await {
                Ok(facts) => {
                    build_checks.insert(suite, BuildCheck::new(facts));
                }
                Err(e) if !e.is_fatal_for_run() => {
                    error!("Build-dependency check for {} unavailable: {}", suite, e);
                }
                Err(e) => return Err(e),
            }
        }

        let archs = ctx.suite_config(&target.target_suite)?.archs.clone();
        let policy = SyncPolicy::new(archs, ctx.distro_name());
        let data = SyncData {
            upstream,
            dest,
            hints,
            build_checks,
        };
        Ok(Self::new(
            target,
            data,
            policy,
            ctx.upstream_layout().clone(),
            tool,
        )
        .with_sync_enabled(config.sync.enabled))
    }

    fn source_catalog(&self) -> Option<&Catalog> {
        self.data.upstream.get(&self.target.source_suite)
    }

    /// Apply the eligibility policy to an upstream record.
    pub fn decide(&self, src: &PackageRecord, force: bool) -> SyncDecision {
        let depwait = self
            .data
            .build_checks
            .get(&src.suite)
            .and_then(|check| check.get(&src.name, &src.version));
        self.policy.decide(
            src,
            self.data.dest.get(&src.name),
            &self.data.hints.blacklist,
            force,
            depwait,
        )
    }

    /// Location of the `.dsc` of an upstream record on the mirror.
    pub fn dsc_path(&self, src: &PackageRecord) -> Result<PathBuf> {
        if src.directory.is_empty() {
            return Err(Error::MalformedRecord {
                origin: src.suite.clone(),
                message: format!("{} has no pool directory", src.name),
            });
        }
        Ok(self.mirror.dsc_path(&src.directory, &src.dsc_name()))
    }

    async fn import(&self, src: &PackageRecord) -> Result<SyncOutcome> {
        info!("Attempt to import package: {} ({})", src.name, src.version_without_epoch());
        let dsc = self.dsc_path(src)?;
        match self
            .tool
            .import(&self.target.target_suite, &self.target.component, &dsc)
            .await?
        {
            ImportOutcome::Imported => Ok(SyncOutcome::Imported),
            ImportOutcome::AlreadyInPool => Ok(SyncOutcome::AlreadyInPool),
        }
    }

    fn log_block(&self, src: &PackageRecord, decision: &SyncDecision) {
        let reason = decision
            .blocking_reason
            .map(|r| r.code())
            .unwrap_or("unknown");
        match &decision.detail {
            Some(detail) => info!("Not syncing {} {}: {} ({})", src.name, src.version, reason, detail),
            None => info!("Not syncing {} {}: {}", src.name, src.version, reason),
        }
    }

    /// Sync one package from the source suite.
    pub async fn sync_package(&self, name: &str, force: bool) -> Result<SyncOutcome> {
        let Some(src) = self.source_catalog().and_then(|c| c.get(name)) else {
            warn!(
                "Cannot sync {}, package doesn't exist upstream ({}/{})",
                name, self.target.source_suite, self.target.component
            );
            return Ok(SyncOutcome::Missing);
        };
        self.sync_record(src, force).await
    }

    async fn sync_record(&self, src: &PackageRecord, force: bool) -> Result<SyncOutcome> {
        let decision = self.decide(src, force);
        if !decision.allowed {
            self.log_block(src, &decision);
            return Ok(SyncOutcome::Blocked(decision));
        }

        if self.dry_run {
            match self.data.dest.get(&src.name) {
                Some(dest) => println!("Import: {} ({} -> {})", src.name, dest.version, src.version),
                None => println!("Import: {} ({}) [new!]", src.name, src.version),
            }
            return Ok(SyncOutcome::DryRun);
        }
        self.import(src).await
    }

    /// Sync several packages. A failing package does not stop the batch.
    pub async fn sync_packages<I, S>(&self, names: I, force: bool) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut result = BatchResult::default();
        for name in names {
            let name = name.as_ref();
            let outcome = self.sync_package(name, force).await;
            if let Err(e) = &outcome {
                error!("Failed to sync {}: {}", name, e);
            }
            result.outcomes.push((name.to_string(), outcome));
        }
        result
    }

    /// Sync every source-suite package whose name matches `pattern` at its
    /// start.
    pub async fn sync_matching(&self, pattern: &str, force: bool) -> Result<BatchResult> {
        let regex = Regex::new(&format!("^(?:{})", pattern))?;
        let names: Vec<String> = self
            .source_catalog()
            .map(|c| c.names().filter(|n| regex.is_match(n)).map(str::to_string).collect())
            .unwrap_or_default();
        debug!("{} packages match {}", names.len(), pattern);
        Ok(self.sync_packages(names, force).await)
    }

    /// Sync the packages listed in the named set.
    pub async fn sync_set(&self, set_name: &str) -> Result<BatchResult> {
        let set = self.data.hints.set(set_name)?;
        Ok(self.sync_packages(set.keys(), false).await)
    }

    fn sync_allowed(&self, name: &str) -> bool {
        self.sync_enabled || self.data.hints.has_override(name)
    }

    async fn sync_all_record(&self, src: &PackageRecord, report: &mut SyncReport) {
        let decision = self.decide(src, false);
        if !decision.allowed {
            if let Some(reason) = decision.blocking_reason.filter(|r| r.needs_attention()) {
                self.log_block(src, &decision);
                report.failures.push(SyncFailure {
                    name: src.name.clone(),
                    dest_version: self
                        .data
                        .dest
                        .get(&src.name)
                        .map(|d| d.version.clone())
                        .unwrap_or_default(),
                    src_version: src.version.clone(),
                    fail_type: reason,
                    details: decision.detail,
                });
            }
            return;
        }

        if self.dry_run {
            println!("Sync: {} ({})", src.name, src.version);
            return;
        }
        if !self.sync_allowed(&src.name) {
            debug!("Not syncing {}: imports are frozen", src.name);
            return;
        }
        match self.import(src).await {
            Ok(_) => report.imported.push(format!("{}/{}", src.name, src.version)),
            Err(e) => {
                error!("Failed to import {} {}: {}", src.name, src.version, e);
                report.import_errors.push(e.to_string());
            }
        }
    }

    /// Sync everything that is newer upstream, then the packages with
    /// autosync overrides from other suites.
    pub async fn sync_all(&self) -> SyncReport {
        let mut report = SyncReport {
            source_suite: self.target.source_suite.clone(),
            target_suite: self.target.target_suite.clone(),
            component: self.target.component.clone(),
            import_freeze: !self.sync_enabled,
            ..Default::default()
        };
        if !self.sync_enabled {
            info!("Package syncs are disabled. Only packages with freeze exceptions are synced.");
        }

        if let Some(catalog) = self.source_catalog() {
            for src in catalog.iter() {
                self.sync_all_record(src, &mut report).await;
            }
        }

        for (name, suite) in &self.data.hints.autosync_overrides {
            if *suite == self.target.source_suite {
                continue;
            }
            match self.data.upstream.get(suite).and_then(|c| c.get(name)) {
                Some(src) => self.sync_all_record(src, &mut report).await,
                None => debug!("Override {}/{} not found upstream", suite, name),
            }
        }

        info!(
            "Sync of {} finished: {} imported, {} issues, {} errors",
            self.target.component,
            report.imported.len(),
            report.failures.len(),
            report.import_errors.len()
        );
        report
    }

    /// Write a sync report to the report directory.
    pub fn write_report(ctx: &RunContext, report: &SyncReport) -> Result<PathBuf> {
        write_json_report(
            &ctx.config().general.report_dir,
            &format!("sync-issues_{}", report.component),
            report,
        )
    }
}
