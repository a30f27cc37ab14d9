//! Error types for the APT repository library.

/// Result type for APT repository operations.
pub type Result<T> = std::result::Result<T, AptRepositoryError>;

/// Errors that can occur when reading APT archive indices.
#[derive(Debug, thiserror::Error)]
pub enum AptRepositoryError {
    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Index file does not exist or cannot be opened.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A paragraph could not be split into fields.
    #[error("Invalid paragraph: {0}")]
    InvalidParagraph(String),

    /// Invalid package control data.
    #[error("Invalid package data: {0}")]
    InvalidPackageData(String),

    /// Invalid source control data.
    #[error("Invalid source data: {0}")]
    InvalidSourceData(String),

    /// Compression error.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid field value.
    #[error("Invalid field value for '{field}': {value}")]
    InvalidField { field: String, value: String },
}

impl AptRepositoryError {
    /// Create a new invalid paragraph error.
    pub fn invalid_paragraph<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParagraph(msg.into())
    }

    /// Create a new invalid package data error.
    pub fn invalid_package<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPackageData(msg.into())
    }

    /// Create a new invalid source data error.
    pub fn invalid_source<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSourceData(msg.into())
    }

    /// Create a new missing field error.
    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        Self::MissingField(field.into())
    }

    /// Create a new invalid field error.
    pub fn invalid_field<S: Into<String>>(field: S, value: S) -> Self {
        Self::InvalidField {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether this error describes a single bad record rather than an
    /// unreadable index.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParagraph(_)
                | Self::InvalidPackageData(_)
                | Self::InvalidSourceData(_)
                | Self::MissingField(_)
                | Self::InvalidField { .. }
        )
    }
}
