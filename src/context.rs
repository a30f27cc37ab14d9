//! Per-run state shared by the workflows.

use crate::catalog::{
    binary_index_files, source_index_files, Catalog, CatalogBuilder, IndexFile,
};
use crate::config::{Config, SuiteConfig};
use crate::installability::Solver;
use crate::layout::{base_suite, component_closure, ArchiveLayout};
use crate::removals::{fetch_removals, RemovalNotice};
use crate::{Error, Result};
use apt_repository::Package;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Everything a run needs, built once from a validated configuration and
/// dropped when the run ends.
pub struct RunContext {
    config: Config,
    local: ArchiveLayout,
    upstream: ArchiveLayout,
    client: reqwest::Client,
    builder: CatalogBuilder,
    removals: OnceCell<Vec<RemovalNotice>>,
}

impl RunContext {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let local = ArchiveLayout::new(&config.general.archive_root, &config.general.distro_name);
        let upstream = ArchiveLayout::mirror(&config.general.upstream_mirror);
        let client = reqwest::Client::builder()
            .user_agent(concat!("archive-steward/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let builder = CatalogBuilder::new(config.workers);
        Ok(Self {
            config,
            local,
            upstream,
            client,
            builder,
            removals: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_layout(&self) -> &ArchiveLayout {
        &self.local
    }

    pub fn upstream_layout(&self) -> &ArchiveLayout {
        &self.upstream
    }

    pub fn distro_name(&self) -> &str {
        &self.config.general.distro_name
    }

    /// Settings of `suite`, or of its base suite.
    pub fn suite_config(&self, suite: &str) -> Result<&SuiteConfig> {
        self.config
            .suite_or_base(suite)
            .ok_or_else(|| Error::config(format!("Suite {} is not configured", suite)))
    }

    /// Merged catalog of a local suite over `components`.
    pub async fn local_catalog(&self, suite: &str, components: &[String]) -> Result<Catalog> {
        let indices = source_index_files(&self.config, &self.local, suite, components);
        let catalog = self.builder.build_catalog(&indices).await?;
        info!("Loaded {} source packages from {}", catalog.len(), suite);
        Ok(catalog)
    }

    /// Local catalog with binaries attached, without the records whose pool
    /// contents disagree with the indices.
    ///
    /// `archs` are the suite's architectures; `all` is always read as well.
    pub async fn local_catalog_with_binaries(
        &self,
        suite: &str,
        components: &[String],
        archs: &[String],
    ) -> Result<Catalog> {
        let mut catalog = self.local_catalog(suite, components).await?;
        let mut archs = archs.to_vec();
        if !archs.iter().any(|a| a == "all") {
            archs.push("all".to_string());
        }
        let indices = binary_index_files(&self.config, &self.local, suite, components, &archs);
        self.builder.enrich_binaries(&mut catalog, &indices).await;
        let dropped = catalog.drop_inconsistent(&self.local, &archs);
        if !dropped.is_empty() {
            debug!("Dropped {} inconsistent records from {}", dropped.len(), suite);
        }
        Ok(catalog)
    }

    /// Binary packages of a local suite for one component and architecture.
    pub async fn local_packages(&self, suite: &str, component: &str, arch: &str) -> Vec<Package> {
        let index = IndexFile::packages(
            self.local.packages_index(suite, component, arch),
            suite,
            component,
            arch,
        );
        self.builder.read_packages(&[index]).await
    }

    /// Catalog of an upstream suite on the mirror.
    pub async fn upstream_catalog(&self, suite: &str, components: &[String]) -> Result<Catalog> {
        let indices: Vec<IndexFile> = components
            .iter()
            .map(|c| IndexFile::sources(self.upstream.sources_index(suite, c), suite, c))
            .collect();
        let catalog = self.builder.build_catalog(&indices).await?;
        info!(
            "Loaded {} upstream source packages from {}",
            catalog.len(),
            suite
        );
        Ok(catalog)
    }

    /// Binary indices that satisfy build dependencies for `suite`: the suite
    /// itself plus its incoming queue, or else its base suite.
    pub fn buildcheck_indices(&self, suite: &str, component: &str, arch: &str) -> Vec<PathBuf> {
        let arch = if arch == "all" { "amd64" } else { arch };
        let mut layouts = vec![(self.local.clone(), suite.to_string())];
        let queue = self
            .config
            .suite(suite)
            .and_then(|s| s.incoming_queue.clone());
        match (queue, &self.config.archive.build_queues_root) {
            (Some(queue), Some(root)) => layouts.push((ArchiveLayout::mirror(root), queue)),
            _ => {
                let base = base_suite(suite);
                if base != suite {
                    layouts.push((self.local.clone(), base));
                }
            }
        }

        let mut indices = Vec::new();
        for (layout, suite) in &layouts {
            for component in component_closure(component) {
                indices.push(layout.packages_index(suite, &component, arch));
            }
        }
        indices
    }

    /// Installability checker.
    pub fn debcheck(&self) -> Solver {
        Solver::new(&self.config.solver.debcheck, self.config.solver_timeout())
    }

    /// Build-dependency checker.
    pub fn builddebcheck(&self) -> Solver {
        Solver::new(&self.config.solver.builddebcheck, self.config.solver_timeout())
            .with_args(["--latest"])
    }

    /// The upstream removal feed, fetched on first use.
    pub async fn removals(&self) -> Result<&[RemovalNotice]> {
        let notices = self
            .removals
            .get_or_try_init(|| fetch_removals(&self.client, &self.config.cruft.removals_url))
            .await?;
        Ok(notices.as_slice())
    }
}
