//! # APT Repository Library
//!
//! A Rust library for reading the metadata of APT archives. It understands the
//! tagged-record ("deb822") format used by `Sources` and `Packages` indices,
//! transparently decompresses them and turns their paragraphs into typed
//! source and binary package records.
//!
//! ## Features
//!
//! - Lazy, paragraph-at-a-time reading of index files on top of `deb822-fast`
//! - Support for multiple compression formats (gzip, xz, bzip2, uncompressed)
//! - Malformed paragraphs are skipped and counted rather than aborting a read
//! - Typed access to the fields archive tooling cares about
//!
//! ## Example
//!
//! ```rust
//! use apt_repository::{IndexReader, Source};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let text = "Package: hello\nVersion: 2.10-3\nArchitecture: any\n\
//!             Directory: pool/main/h/hello\nFiles:\n abc 1 hello_2.10-3.dsc\n";
//! let mut reader = IndexReader::from_reader(text.as_bytes());
//! let sources: Vec<Source> = reader.sources().collect();
//! assert_eq!(sources[0].dsc_name(), Some("hello_2.10-3.dsc"));
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod error;
pub mod index;
pub mod packages;
pub mod sources;

pub use compression::Compression;
pub use error::{AptRepositoryError, Result};
pub use index::IndexReader;
pub use packages::Package;
pub use deb822_fast::Paragraph;
pub use sources::{Source, SourceFileEntry};

/// Compression formats tried, in order, when looking for an index on disk.
pub const DEFAULT_COMPRESSIONS: &[Compression] = &[
    Compression::Gzip,
    Compression::Xz,
    Compression::Bzip2,
    Compression::None,
];

/// Get a field value, failing with [`AptRepositoryError::MissingField`] when it
/// is absent or empty.
pub(crate) fn require<'a>(paragraph: &'a Paragraph, name: &str) -> Result<&'a str> {
    match paragraph.get(name).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AptRepositoryError::missing_field(name)),
    }
}
