//! Error types shared by the archive workflows.

use std::path::PathBuf;

/// Result type for archive-steward operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading the archive or acting on it.
///
/// There is no variant for unparseable versions: an empty or odd version
/// string is ordered, never rejected.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required archive index is missing or unreadable.
    #[error("Index not found: {}", .0.display())]
    IndexNotFound(PathBuf),

    /// A record could not be interpreted.
    #[error("Malformed record in {origin}: {message}")]
    MalformedRecord { origin: String, message: String },

    /// The dependency solver could not be run or produced no usable report.
    #[error("Solver invocation failed: {0}")]
    SolverInvocationFailed(String),

    /// The archive tool rejected an import or removal.
    #[error("Archive tool failed for {package}: {message}")]
    ImportToolFailed { package: String, message: String },

    /// A catalog entry disagrees with the files in the pool.
    #[error("Inconsistent catalog entry {package}: {message}")]
    InconsistentCatalogEntry { package: String, message: String },

    /// A package is not in the catalog it was looked up in.
    #[error("Package {package} not found in {suite}")]
    PackageNotFound { suite: String, package: String },

    /// A rebuild source could not be prepared.
    #[error("Rebuild of {package} failed: {message}")]
    RebuildFailed { package: String, message: String },

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the index reader.
    #[error("Index error: {0}")]
    Index(#[from] apt_repository::AptRepositoryError),

    /// YAML parsing errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid regular expression.
    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a solver failure.
    pub fn solver<S: Into<String>>(msg: S) -> Self {
        Self::SolverInvocationFailed(msg.into())
    }

    /// Create an archive tool failure for a package.
    pub fn import_failed<P: Into<String>, S: Into<String>>(package: P, msg: S) -> Self {
        Self::ImportToolFailed {
            package: package.into(),
            message: msg.into(),
        }
    }

    pub fn rebuild_failed<P: Into<String>, S: Into<String>>(package: P, msg: S) -> Self {
        Self::RebuildFailed {
            package: package.into(),
            message: msg.into(),
        }
    }

    /// Whether this error should abort the whole run rather than only the
    /// package or file that raised it.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Config(_) | Self::IndexNotFound(_) | Self::Regex(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::config("no distro").is_fatal_for_run());
        assert!(Error::IndexNotFound(PathBuf::from("/srv/Sources.gz")).is_fatal_for_run());
        assert!(!Error::solver("timeout").is_fatal_for_run());
        assert!(!Error::import_failed("foo", "rejected").is_fatal_for_run());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::import_failed("foo", "rejected").to_string(),
            "Archive tool failed for foo: rejected"
        );
        assert_eq!(
            Error::IndexNotFound(PathBuf::from("/srv/Sources.gz")).to_string(),
            "Index not found: /srv/Sources.gz"
        );
    }
}
