//! Merged view of the source packages of a suite.
//!
//! Index files are parsed in parallel but merged strictly in the order they
//! were given, so that ties between equal versions always resolve to the
//! first-seen record.

use crate::config::Config;
use crate::layout::{resolve_index, ArchiveLayout};
use crate::version::{compare, strip_epoch};
use crate::{Error, Result};
use apt_repository::{IndexReader, Package, Source};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// A binary built from a source package, as listed in a Packages index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryEntry {
    pub name: String,
    pub arch: String,
    pub filename: String,
}

/// One source package of a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub suite: String,
    pub component: String,
    /// Architectures from the `Architecture` field, wildcards included.
    pub architectures: BTreeSet<String>,
    /// Pool directory relative to the archive base.
    pub directory: String,
    pub source_control_file: Option<String>,
    pub build_depends: String,
    pub build_conflicts: String,
    pub maintainer: String,
    pub co_maintainers: String,
    pub homepage: Option<String>,
    pub extra_source_only: bool,
    pub binaries: Vec<BinaryEntry>,
    /// Architectures for which binaries of this exact version are published.
    pub installed_architectures: BTreeSet<String>,
}

impl PackageRecord {
    /// Create a record with only the identifying fields set.
    pub fn new<S: Into<String>>(name: S, version: S, suite: S, component: S) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            suite: suite.into(),
            component: component.into(),
            architectures: BTreeSet::new(),
            directory: String::new(),
            source_control_file: None,
            build_depends: String::new(),
            build_conflicts: String::new(),
            maintainer: String::new(),
            co_maintainers: String::new(),
            homepage: None,
            extra_source_only: false,
            binaries: Vec::new(),
            installed_architectures: BTreeSet::new(),
        }
    }

    /// Set the architecture list from a space separated field value.
    pub fn with_architectures(mut self, archs: &str) -> Self {
        self.architectures = archs.split_whitespace().map(str::to_string).collect();
        self
    }

    pub fn with_directory<S: Into<String>>(mut self, directory: S) -> Self {
        self.directory = directory.into();
        self
    }

    /// Convert a parsed Sources paragraph.
    pub fn from_source(source: Source, suite: &str, component: &str) -> Self {
        let source_control_file = source.dsc_name().map(str::to_string);
        Self {
            name: source.package,
            version: source.version,
            suite: suite.to_string(),
            component: component.to_string(),
            architectures: source.architecture.into_iter().collect(),
            directory: source.directory,
            source_control_file,
            build_depends: source.build_depends.unwrap_or_default(),
            build_conflicts: source.build_conflicts.unwrap_or_default(),
            maintainer: source.maintainer.unwrap_or_default(),
            co_maintainers: source.uploaders.unwrap_or_default(),
            homepage: source.homepage,
            extra_source_only: source.extra_source_only,
            binaries: Vec::new(),
            installed_architectures: BTreeSet::new(),
        }
    }

    pub fn version_without_epoch(&self) -> &str {
        strip_epoch(&self.version)
    }

    /// Name of the `.dsc` file, derived from name and version when the index
    /// did not list one.
    pub fn dsc_name(&self) -> String {
        match &self.source_control_file {
            Some(dsc) => dsc.clone(),
            None => format!("{}_{}.dsc", self.name, self.version_without_epoch()),
        }
    }
}

impl std::fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) in {}/{}",
            self.name, self.version, self.suite, self.component
        )
    }
}

/// Source packages by name; at most one record per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    records: BTreeMap<String, PackageRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a record, keeping whichever of the new and the existing record
    /// has the strictly higher version. Returns whether the record was stored.
    pub fn merge(&mut self, record: PackageRecord) -> bool {
        if let Some(existing) = self.records.get(&record.name) {
            if compare(&existing.version, &record.version) != Ordering::Less {
                return false;
            }
        }
        self.records.insert(record.name.clone(), record);
        true
    }

    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<PackageRecord> {
        self.records.remove(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Attach a binary package to the source record it was built from.
    ///
    /// Binaries whose architecture differs from the index they were read from
    /// are ignored, as are binaries of another source version.
    pub fn add_binary(&mut self, package: &Package, index_arch: &str) -> bool {
        if package.architecture != index_arch {
            debug!(
                "Ignoring {} listed in the {} index with architecture {}",
                package.package, index_arch, package.architecture
            );
            return false;
        }
        let (source, version) = package.source_name_version();
        match self.records.get_mut(source) {
            Some(record) if record.version == version => {
                record.installed_architectures.insert(index_arch.to_string());
                record.binaries.push(BinaryEntry {
                    name: package.package.clone(),
                    arch: index_arch.to_string(),
                    filename: package.filename.clone(),
                });
                true
            }
            _ => false,
        }
    }

    /// Drop records whose pool holds binaries for an architecture that no
    /// binary index lists them for.
    ///
    /// Without index entries such binaries cannot be used, and rebuilding the
    /// package would be rejected as a duplicate, so the record is left out
    /// until the archive is consistent again.
    pub fn drop_inconsistent(&mut self, layout: &ArchiveLayout, archs: &[String]) -> Vec<Error> {
        let mut dropped = Vec::new();
        let names: Vec<String> = self.records.keys().cloned().collect();
        for name in names {
            let Some(record) = self.records.get(&name) else {
                continue;
            };
            let missing = archs.iter().find(|arch| {
                !record.installed_architectures.contains(*arch)
                    && pool_has_binary(
                        &layout.pool_path(&record.directory),
                        record.version_without_epoch(),
                        arch,
                    )
            });
            if let Some(arch) = missing {
                warn!(
                    "Skipping {} ({}) in {} due to repository inconsistencies",
                    record.name, record.version, record.suite
                );
                dropped.push(Error::InconsistentCatalogEntry {
                    package: record.name.clone(),
                    message: format!("binaries for {} in the pool but not in the index", arch),
                });
                self.records.remove(&name);
            }
        }
        dropped
    }
}

impl FromIterator<PackageRecord> for Catalog {
    fn from_iter<I: IntoIterator<Item = PackageRecord>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for record in iter {
            catalog.merge(record);
        }
        catalog
    }
}

fn pool_has_binary(directory: &Path, version: &str, arch: &str) -> bool {
    let deb = format!("_{}_{}.deb", version, arch);
    let udeb = format!("_{}_{}.udeb", version, arch);
    match std::fs::read_dir(directory) {
        Ok(entries) => entries.filter_map(|e| e.ok()).any(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.ends_with(&deb) || name.ends_with(&udeb)
        }),
        Err(_) => false,
    }
}

/// What an index file contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKind {
    Sources,
    Packages { arch: String },
}

/// An index file together with the suite and component it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub path: PathBuf,
    pub suite: String,
    pub component: String,
    pub kind: IndexKind,
}

impl IndexFile {
    pub fn sources<P: Into<PathBuf>>(path: P, suite: &str, component: &str) -> Self {
        Self {
            path: path.into(),
            suite: suite.to_string(),
            component: component.to_string(),
            kind: IndexKind::Sources,
        }
    }

    pub fn packages<P: Into<PathBuf>>(path: P, suite: &str, component: &str, arch: &str) -> Self {
        Self {
            path: path.into(),
            suite: suite.to_string(),
            component: component.to_string(),
            kind: IndexKind::Packages {
                arch: arch.to_string(),
            },
        }
    }
}

fn open_index(path: &Path) -> Result<IndexReader> {
    let resolved = resolve_index(path).ok_or_else(|| Error::IndexNotFound(path.to_path_buf()))?;
    IndexReader::open(&resolved).map_err(|e| match e {
        apt_repository::AptRepositoryError::FileNotFound(_) => {
            Error::IndexNotFound(path.to_path_buf())
        }
        e => e.into(),
    })
}

fn finish_index(mut reader: IndexReader, index: &IndexFile) -> Result<()> {
    if reader.skipped() > 0 {
        warn!(
            "Skipped {} malformed records in {}",
            reader.skipped(),
            index.path.display()
        );
    }
    match reader.take_error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn read_source_records(index: &IndexFile) -> Result<Vec<PackageRecord>> {
    let mut reader = open_index(&index.path)?;
    let records = reader
        .sources()
        .map(|source| PackageRecord::from_source(source, &index.suite, &index.component))
        .collect();
    finish_index(reader, index)?;
    Ok(records)
}

fn read_binary_records(index: &IndexFile) -> Result<Vec<Package>> {
    let mut reader = open_index(&index.path)?;
    let packages = reader.packages().collect();
    finish_index(reader, index)?;
    Ok(packages)
}

/// Parse index files on a bounded pool of blocking tasks. Results come back
/// in input order.
async fn read_indices<T: Send + 'static>(
    indices: &[IndexFile],
    workers: usize,
    parse: fn(&IndexFile) -> Result<Vec<T>>,
) -> Vec<Result<Vec<T>>> {
    stream::iter(indices.iter().cloned())
        .map(move |index| async move {
            tokio::task::spawn_blocking(move || parse(&index))
                .await
                .unwrap_or_else(|e| {
                    Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
                })
        })
        .buffered(workers.max(1))
        .collect()
        .await
}

/// Builds catalogs from index files.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    workers: usize,
}

impl CatalogBuilder {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Merge the given Sources indices in order.
    ///
    /// A missing or unreadable index only loses that index; the call fails
    /// with the first error when no index could be read at all.
    pub async fn build_catalog(&self, sources: &[IndexFile]) -> Result<Catalog> {
        let results = read_indices(sources, self.workers, read_source_records).await;

        let mut catalog = Catalog::new();
        let mut first_error = None;
        let mut read_any = sources.is_empty();
        for (index, result) in sources.iter().zip(results) {
            match result {
                Ok(records) => {
                    read_any = true;
                    debug!("Merging {} records from {}", records.len(), index.path.display());
                    for record in records {
                        catalog.merge(record);
                    }
                }
                Err(e) => {
                    error!("Unable to read {}: {}", index.path.display(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if !read_any => Err(e),
            _ => Ok(catalog),
        }
    }

    /// Binary packages of `indices` in index order. Unreadable indices are
    /// logged and skipped.
    pub async fn read_packages(&self, indices: &[IndexFile]) -> Vec<Package> {
        let results = read_indices(indices, self.workers, read_binary_records).await;
        let mut packages = Vec::new();
        for (index, result) in indices.iter().zip(results) {
            match result {
                Ok(found) => packages.extend(found),
                Err(e) => warn!("Unable to read {}: {}", index.path.display(), e),
            }
        }
        packages
    }

    /// Attach the binaries listed in Packages indices to their sources.
    pub async fn enrich_binaries(&self, catalog: &mut Catalog, indices: &[IndexFile]) {
        let results = read_indices(indices, self.workers, read_binary_records).await;

        for (index, result) in indices.iter().zip(results) {
            let IndexKind::Packages { arch } = &index.kind else {
                continue;
            };
            match result {
                Ok(packages) => {
                    for package in &packages {
                        catalog.add_binary(package, arch);
                    }
                }
                Err(Error::IndexNotFound(path)) => {
                    debug!("No binary index at {}", path.display());
                }
                Err(e) => warn!("Unable to read {}: {}", index.path.display(), e),
            }
        }
    }
}

/// Sources indices making up the catalog of a local suite, in merge order:
/// the suite itself, its incoming queue, then its overlay suite.
pub fn source_index_files(
    config: &Config,
    layout: &ArchiveLayout,
    suite: &str,
    components: &[String],
) -> Vec<IndexFile> {
    let mut indices: Vec<IndexFile> = components
        .iter()
        .map(|c| IndexFile::sources(layout.sources_index(suite, c), suite, c))
        .collect();

    let queue = config.suite(suite).and_then(|s| s.incoming_queue.as_deref());
    if let (Some(queue), Some(root)) = (queue, &config.archive.build_queues_root) {
        let queue_layout = ArchiveLayout::mirror(root);
        indices.extend(
            components
                .iter()
                .map(|c| IndexFile::sources(queue_layout.sources_index(queue, c), queue, c)),
        );
    }

    if let Some(overlay) = config.overlay_suite(suite) {
        indices.extend(
            components
                .iter()
                .map(|c| IndexFile::sources(layout.sources_index(overlay, c), overlay, c)),
        );
    }
    indices
}

/// Packages indices (regular and installer) for the suites a suite's binaries
/// may be published in.
pub fn binary_index_files(
    config: &Config,
    layout: &ArchiveLayout,
    suite: &str,
    components: &[String],
    archs: &[String],
) -> Vec<IndexFile> {
    let mut suites = vec![suite.to_string()];
    if let Some(overlay) = config.overlay_suite(suite) {
        suites.push(overlay.to_string());
    }
    let base = crate::layout::base_suite(suite);
    if !suites.contains(&base) {
        suites.push(base);
    }

    let mut indices = Vec::new();
    for suite in &suites {
        for component in components {
            for arch in archs {
                indices.push(IndexFile::packages(
                    layout.packages_index(suite, component, arch),
                    suite,
                    component,
                    arch,
                ));
                indices.push(IndexFile::packages(
                    layout.installer_packages_index(suite, component, arch),
                    suite,
                    component,
                    arch,
                ));
            }
        }
    }
    indices
}
