//! Source package records from `Sources` indices.

use crate::{require, AptRepositoryError, Paragraph, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Debian source package entry in a Sources file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Package name.
    pub package: String,
    /// Package version.
    pub version: String,
    /// Architectures, including wildcards such as `any` or `linux-any`.
    pub architecture: Vec<String>,
    /// Directory (relative to repository root).
    pub directory: String,
    /// Binary package names produced by this source.
    pub binary: Vec<String>,
    /// Maintainer.
    pub maintainer: Option<String>,
    /// Uploaders.
    pub uploaders: Option<String>,
    /// Build dependencies.
    pub build_depends: Option<String>,
    /// Build conflicts.
    pub build_conflicts: Option<String>,
    /// Package homepage.
    pub homepage: Option<String>,
    /// Whether the source is only kept around for a binary in another suite.
    pub extra_source_only: bool,
    /// Files that make up this source package.
    pub files: Vec<SourceFileEntry>,
    /// Entries of the strongest `Checksums-*` field present.
    pub checksums: Vec<SourceFileEntry>,
}

/// A file entry in a source package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileEntry {
    /// Hash value.
    pub hash: String,
    /// File size in bytes.
    pub size: u64,
    /// Filename.
    pub name: String,
}

impl SourceFileEntry {
    /// Create a new source file entry.
    pub fn new<S: Into<String>>(hash: S, size: u64, name: S) -> Self {
        Self {
            hash: hash.into(),
            size,
            name: name.into(),
        }
    }

    /// Parse a file entry from a checksum line.
    pub fn from_checksum_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(AptRepositoryError::invalid_source(format!(
                "Invalid checksum line format: {}",
                line
            )));
        }

        let size = parts[1].parse::<u64>().map_err(|_| {
            AptRepositoryError::invalid_source(format!(
                "Invalid size in checksum line: {}",
                parts[1]
            ))
        })?;

        Ok(Self::new(parts[0], size, parts[2]))
    }
}

impl Source {
    /// Create a new source package with required fields.
    pub fn new<S: Into<String>>(package: S, version: S, architecture: &str, directory: S) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            architecture: split_architectures(architecture),
            directory: directory.into(),
            binary: Vec::new(),
            maintainer: None,
            uploaders: None,
            build_depends: None,
            build_conflicts: None,
            homepage: None,
            extra_source_only: false,
            files: Vec::new(),
            checksums: Vec::new(),
        }
    }

    /// Build a source package from an index paragraph.
    ///
    /// `Package`, `Version`, `Architecture`, `Directory` and one of `Files` or
    /// `Checksums-*` are mandatory.
    pub fn from_paragraph(paragraph: &Paragraph) -> Result<Self> {
        let package = require(paragraph, "Package")?;
        let version = require(paragraph, "Version")?;
        let architecture = require(paragraph, "Architecture")?;
        let directory = require(paragraph, "Directory")?;

        let files = Self::parse_file_list(paragraph.get("Files").unwrap_or_default())?;
        let checksums = ["Checksums-Sha512", "Checksums-Sha256", "Checksums-Sha1"]
            .iter()
            .find_map(|name| paragraph.get(name).filter(|v| !v.trim().is_empty()))
            .map(Self::parse_file_list)
            .transpose()?
            .unwrap_or_default();
        if files.is_empty() && checksums.is_empty() {
            return Err(AptRepositoryError::missing_field("Files"));
        }

        let mut source = Self::new(package, version, architecture, directory);
        source.binary = paragraph
            .get("Binary")
            .map(|b| {
                b.split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        source.maintainer = field(paragraph, "Maintainer");
        source.uploaders = field(paragraph, "Uploaders");
        source.build_depends = field(paragraph, "Build-Depends");
        source.build_conflicts = field(paragraph, "Build-Conflicts");
        source.homepage = field(paragraph, "Homepage");
        source.extra_source_only = paragraph.get("Extra-Source-Only").map(str::trim) == Some("yes");
        source.files = files;
        source.checksums = checksums;
        Ok(source)
    }

    /// Parse a file list from a multi-line field.
    fn parse_file_list(content: &str) -> Result<Vec<SourceFileEntry>> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(SourceFileEntry::from_checksum_line)
            .collect()
    }

    /// Name of the `.dsc` control file of this source package.
    pub fn dsc_name(&self) -> Option<&str> {
        self.files
            .iter()
            .chain(self.checksums.iter())
            .map(|entry| entry.name.as_str())
            .find(|name| name.ends_with(".dsc"))
    }
}

/// Multi-line values are folded onto one line.
fn field(paragraph: &Paragraph, name: &str) -> Option<String> {
    paragraph
        .get(name)
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Split an `Architecture` field value, dropping duplicates but keeping order.
pub fn split_architectures(value: &str) -> Vec<String> {
    let mut archs: Vec<String> = Vec::new();
    for arch in value.split_whitespace() {
        if !archs.iter().any(|a| a == arch) {
            archs.push(arch.to_string());
        }
    }
    archs
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package, self.version)
    }
}
