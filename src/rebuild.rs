//! No-change rebuilds of local source packages.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::context::RunContext;
use crate::layout::ArchiveLayout;
use crate::tool::{ArchiveTool, ImportOutcome};
use crate::version::{bump_rebuild, strip_epoch};
use crate::{Error, Result};
use apt_repository::Package;
use async_trait::async_trait;
use debian_control::lossless::relations::Relations;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A planned rebuild of one source package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub package_name: String,
    /// Suite the rebuilt source is imported into.
    pub suite: String,
    pub component: String,
    pub old_version: String,
    pub new_version: String,
    /// The `.dsc` of the current version.
    pub dsc_path: PathBuf,
    /// Changelog entry of the rebuild.
    pub note: String,
}

impl RebuildPlan {
    /// File name of the `.dsc` the rebuild produces.
    pub fn new_dsc_name(&self) -> String {
        format!("{}_{}.dsc", self.package_name, strip_epoch(&self.new_version))
    }
}

/// Suite that receives rebuilds requested for `suite`. Rebuilds for the
/// development suite go through staging when there is one.
pub fn rebuild_suite<'a>(config: &'a Config, suite: &'a str) -> &'a str {
    match &config.archive.staging_suite {
        Some(staging) if suite == config.archive.devel_suite => staging.as_str(),
        _ => suite,
    }
}

/// Plan a rebuild of `name` from `catalog`, taking the source from `layout`.
pub fn plan_rebuild(
    catalog: &Catalog,
    layout: &ArchiveLayout,
    suite: &str,
    name: &str,
    note: &str,
) -> Result<RebuildPlan> {
    let record = catalog.get(name).ok_or_else(|| Error::PackageNotFound {
        suite: suite.to_string(),
        package: name.to_string(),
    })?;
    if record.directory.is_empty() {
        return Err(Error::MalformedRecord {
            origin: record.suite.clone(),
            message: format!("{} has no pool directory", name),
        });
    }

    Ok(RebuildPlan {
        package_name: record.name.clone(),
        suite: suite.to_string(),
        component: record.component.clone(),
        old_version: record.version.clone(),
        new_version: bump_rebuild(&record.version),
        dsc_path: layout.dsc_path(&record.directory, &record.dsc_name()),
        note: format!("No-change rebuild against {}", note),
    })
}

/// Source packages with a binary that depends on `bad_dependency`, bare or
/// versioned, in the order they are first seen.
///
/// Pre-Depends are not considered; those packages are rebuilt by hand.
pub fn find_rebuild_candidates<'a, I>(packages: I, bad_dependency: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a Package>,
{
    let bad_dependency = bad_dependency.trim();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for package in packages {
        let (source, _) = package.source_name_version();
        if seen.contains(source) {
            continue;
        }
        let Some(depends) = package.depends.as_deref() else {
            continue;
        };
        let relations: Relations = match depends.parse() {
            Ok(relations) => relations,
            Err(e) => {
                warn!("Unable to parse Depends of {}: {}", package.package, e);
                continue;
            }
        };
        let hit = relations
            .entries()
            .any(|entry| entry.relations().any(|rel| rel.name() == bad_dependency));
        if hit {
            seen.insert(source.to_string());
            candidates.push(source.to_string());
        }
    }
    candidates
}

/// Produces the bumped source package for a plan.
#[async_trait]
pub trait SourcePreparer: Send + Sync {
    /// Build the rebuilt source in `workspace` and return its `.dsc`.
    async fn prepare(&self, plan: &RebuildPlan, workspace: &Path) -> Result<PathBuf>;
}

/// Prepares rebuilds with `dpkg-source` and `dch`.
#[derive(Debug, Clone, Default)]
pub struct DchSourcePreparer;

async fn run(package: &str, cmd: &mut Command) -> Result<()> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    debug!("running {:?}", cmd);
    let output = cmd
        .output()
        .await
        .map_err(|e| Error::rebuild_failed(package, e.to_string()))?;
    if !output.status.success() {
        return Err(Error::rebuild_failed(
            package,
            format!(
                "{:?}: {}: {}",
                cmd.as_std().get_program(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

/// Copy the upstream tarballs next to `dsc` into `workspace`, where
/// `dpkg-source -b` looks for them.
async fn copy_orig_tarballs(plan: &RebuildPlan, workspace: &Path) -> Result<()> {
    let Some(pool) = plan.dsc_path.parent() else {
        return Ok(());
    };
    let upstream = strip_epoch(&plan.old_version)
        .rsplit_once('-')
        .map_or(strip_epoch(&plan.old_version), |(upstream, _)| upstream);
    let prefix = format!("{}_{}.orig", plan.package_name, upstream);

    let mut entries = tokio::fs::read_dir(pool).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) {
            tokio::fs::copy(entry.path(), workspace.join(&name)).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl SourcePreparer for DchSourcePreparer {
    async fn prepare(&self, plan: &RebuildPlan, workspace: &Path) -> Result<PathBuf> {
        let name = plan.package_name.as_str();
        let tree = workspace.join("source");

        run(
            name,
            Command::new("dpkg-source")
                .arg("-x")
                .arg(&plan.dsc_path)
                .arg(&tree)
                .current_dir(workspace),
        )
        .await?;
        run(
            name,
            Command::new("dch")
                .arg("--newversion")
                .arg(&plan.new_version)
                .arg("--force-distribution")
                .arg("-D")
                .arg(&plan.suite)
                .arg(&plan.note)
                .current_dir(&tree),
        )
        .await?;
        copy_orig_tarballs(plan, workspace).await?;
        run(
            name,
            Command::new("dpkg-source")
                .arg("-b")
                .arg("source")
                .current_dir(workspace),
        )
        .await?;

        let dsc = workspace.join(plan.new_dsc_name());
        if !dsc.is_file() {
            return Err(Error::rebuild_failed(
                name,
                format!("{} was not produced", dsc.display()),
            ));
        }
        Ok(dsc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Dry run; nothing was built.
    Planned,
    Imported,
    AlreadyInPool,
}

/// Runs rebuild plans: prepares the source in a scratch directory and hands
/// it to the archive tool.
pub struct Rebuilder {
    preparer: Arc<dyn SourcePreparer>,
    tool: Arc<dyn ArchiveTool>,
    dry_run: bool,
}

impl Rebuilder {
    pub fn new(preparer: Arc<dyn SourcePreparer>, tool: Arc<dyn ArchiveTool>) -> Self {
        Self {
            preparer,
            tool,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn rebuild(&self, plan: &RebuildPlan) -> Result<RebuildOutcome> {
        if self.dry_run {
            println!(
                "Rebuild: {} ({} -> {}) in {}",
                plan.package_name, plan.old_version, plan.new_version, plan.suite
            );
            return Ok(RebuildOutcome::Planned);
        }

        let workspace = tempfile::Builder::new()
            .prefix(&format!("rebuild-{}-", plan.package_name))
            .tempdir()?;
        let dsc = self.preparer.prepare(plan, workspace.path()).await?;
        let outcome = match self.tool.import(&plan.suite, &plan.component, &dsc).await? {
            ImportOutcome::Imported => RebuildOutcome::Imported,
            ImportOutcome::AlreadyInPool => RebuildOutcome::AlreadyInPool,
        };
        info!("Triggered rebuild for {} ({})", plan.package_name, plan.new_version);
        Ok(outcome)
    }
}

/// Catalog used to plan rebuilds for `suite`, with inconsistent records
/// removed. Returns the suite rebuilds are imported into alongside it.
pub async fn rebuild_catalog(
    ctx: &RunContext,
    suite: &str,
    component: &str,
) -> Result<(String, Catalog)> {
    let target = rebuild_suite(ctx.config(), suite).to_string();
    let archs = ctx.suite_config(&target)?.archs.clone();
    let catalog = ctx
        .local_catalog_with_binaries(&target, &[component.to_string()], &archs)
        .await?;
    Ok((target, catalog))
}

/// Sources in `suite`/`component` that need a rebuild against a changed
/// `bad_dependency`, judged from the binaries of the first architecture.
pub async fn batch_candidates(
    ctx: &RunContext,
    suite: &str,
    component: &str,
    bad_dependency: &str,
) -> Result<Vec<String>> {
    let suite_config = ctx.suite_config(suite)?;
    let arch = suite_config
        .archs
        .iter()
        .find(|a| *a != "all")
        .ok_or_else(|| Error::config(format!("Suite {} has no binary architecture", suite)))?;
    let packages = ctx.local_packages(suite, component, arch).await;
    Ok(find_rebuild_candidates(&packages, bad_dependency))
}
