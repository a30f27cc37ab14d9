//! Path conventions of archive trees and mirrors.

use std::path::{Path, PathBuf};

/// Suite that `suite` derives its configuration from: the text before the
/// first `-`, or the queue's target for `buildq-<suite>`.
pub fn base_suite(suite: &str) -> String {
    match suite.strip_prefix("buildq-") {
        Some(target) => target.to_string(),
        None => suite.split('-').next().unwrap_or(suite).to_string(),
    }
}

/// An archive tree: `<root>/<distro>/dists/...` for the local archive or
/// `<root>/dists/...` for an upstream mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    root: PathBuf,
    distro: String,
}

impl ArchiveLayout {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(root: P, distro: S) -> Self {
        Self {
            root: root.into(),
            distro: distro.into(),
        }
    }

    /// Layout of a mirror that has no distribution directory.
    pub fn mirror<P: Into<PathBuf>>(root: P) -> Self {
        Self::new(root, "")
    }

    /// Directory that contains `dists/` and `pool/`.
    pub fn base(&self) -> PathBuf {
        if self.distro.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&self.distro)
        }
    }

    fn dists(&self, suite: &str, component: &str) -> PathBuf {
        self.base().join("dists").join(suite).join(component)
    }

    pub fn sources_index(&self, suite: &str, component: &str) -> PathBuf {
        self.dists(suite, component).join("source/Sources.gz")
    }

    pub fn packages_index(&self, suite: &str, component: &str, arch: &str) -> PathBuf {
        self.dists(suite, component)
            .join(format!("binary-{}", arch))
            .join("Packages.gz")
    }

    /// Index of installer (`.udeb`) packages.
    pub fn installer_packages_index(&self, suite: &str, component: &str, arch: &str) -> PathBuf {
        self.dists(suite, component)
            .join("debian-installer")
            .join(format!("binary-{}", arch))
            .join("Packages.gz")
    }

    /// Resolve a pool directory or filename relative to the archive base.
    pub fn pool_path(&self, relative: &str) -> PathBuf {
        self.base().join(relative)
    }

    /// Location of a source control file given the record's pool directory.
    pub fn dsc_path(&self, directory: &str, dsc: &str) -> PathBuf {
        self.pool_path(directory).join(dsc)
    }

    /// Binary indices handed to the installability checker for one suite,
    /// component and architecture.
    ///
    /// Packages for a real architecture may depend on `all` packages, and `all`
    /// packages are checked against `amd64` to resolve arch-specific
    /// dependencies. A suite with an `overlay` (staging) also gets the indices
    /// of the overlay suite, since it is not complete on its own.
    pub fn debcheck_indices(
        &self,
        suite: &str,
        overlay: Option<&str>,
        component: &str,
        arch: &str,
    ) -> Vec<PathBuf> {
        let paired = if arch == "all" { "amd64" } else { "all" };
        let mut indices = vec![
            self.packages_index(suite, component, arch),
            self.packages_index(suite, component, paired),
        ];
        if let Some(overlay) = overlay {
            indices.extend(self.debcheck_indices(overlay, None, component, arch));
        }
        indices
    }

    /// Binary indices for every component the solver needs to see for
    /// `component`: `main` always, `contrib` and `non-free` each other.
    pub fn debcheck_component_indices(
        &self,
        suite: &str,
        overlay: Option<&str>,
        component: &str,
        arch: &str,
    ) -> Vec<PathBuf> {
        component_closure(component)
            .iter()
            .flat_map(|c| self.debcheck_indices(suite, overlay, c, arch))
            .collect()
    }
}

/// Components whose packages may satisfy dependencies of `component`.
pub fn component_closure(component: &str) -> Vec<String> {
    let mut components = vec!["main".to_string()];
    match component {
        "main" => {}
        "contrib" | "non-free" => {
            components.push("contrib".to_string());
            components.push("non-free".to_string());
        }
        other => components.push(other.to_string()),
    }
    components
}

/// The file backing an index path, accepting any supported compression in
/// place of the conventional one.
pub fn resolve_index(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    match path.extension() {
        Some(_) => apt_repository::IndexReader::locate(&path.with_extension("")).ok(),
        None => apt_repository::IndexReader::locate(path).ok(),
    }
}
