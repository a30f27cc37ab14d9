//! Binary package records from `Packages` indices.

use crate::{require, AptRepositoryError, Paragraph, Result};
use debian_control::lossy::apt;
use deb822_fast::FromDeb822Paragraph;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAPPED_FIELDS: &[&str] = &["Package", "Version", "Architecture", "Depends", "Pre-Depends"];

/// A Debian binary package entry in a Packages file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name.
    pub package: String,
    /// Package version.
    pub version: String,
    /// Architecture.
    pub architecture: String,
    /// Filename (relative to repository root).
    pub filename: String,
    /// Raw `Source` field, possibly carrying a version in parentheses.
    pub source: Option<String>,
    /// Package dependencies.
    pub depends: Option<String>,
    /// Package pre-dependencies.
    pub pre_depends: Option<String>,
}

impl Package {
    /// Create a new package with required fields.
    pub fn new<S: Into<String>>(package: S, version: S, architecture: S, filename: S) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            architecture: architecture.into(),
            filename: filename.into(),
            source: None,
            depends: None,
            pre_depends: None,
        }
    }

    /// Build a binary package from an index paragraph.
    ///
    /// `Package`, `Version`, `Architecture` and `Filename` are mandatory. The
    /// version and relationship fields must parse.
    pub fn from_paragraph(paragraph: &Paragraph) -> Result<Self> {
        // Only the mapped fields are typed; `Essential: yes` and the like would
        // otherwise reject the record.
        let core: Paragraph = MAPPED_FIELDS
            .iter()
            .filter_map(|name| paragraph.get(name).map(|v| (name.to_string(), v.to_string())))
            .collect();
        let parsed =
            apt::Package::from_paragraph(&core).map_err(AptRepositoryError::invalid_package)?;
        let filename = require(paragraph, "Filename")?;

        let mut package = Self::new(
            parsed.name.trim().to_string(),
            parsed.version.to_string(),
            parsed.architecture.trim().to_string(),
            filename.to_string(),
        );
        package.source = paragraph.get("Source").map(|s| s.trim().to_string());
        package.depends = parsed.depends.map(|r| r.to_string());
        package.pre_depends = parsed.pre_depends.map(|r| r.to_string());

        if let Some(source) = &package.source {
            if source.contains('(') && !source.ends_with(')') {
                return Err(AptRepositoryError::invalid_field("Source", source.as_str()));
            }
        }

        Ok(package)
    }

    /// Name and version of the source package this binary was built from.
    ///
    /// A `Source: foo (1.2-3)` field overrides the binary version; a bare
    /// `Source: foo` only overrides the name; without the field the binary's
    /// own name and version are used.
    pub fn source_name_version(&self) -> (&str, &str) {
        match self.source.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => match source.split_once('(') {
                Some((name, version)) => (name.trim(), version.trim_end_matches(')').trim()),
                None => (source, self.version.as_str()),
            },
            _ => (self.package.as_str(), self.version.as_str()),
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.package, self.version, self.architecture)
    }
}
