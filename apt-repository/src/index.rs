//! Reading `Sources` and `Packages` index files.

use crate::{
    AptRepositoryError, Compression, Package, Paragraph, Result, Source, DEFAULT_COMPRESSIONS,
};
use deb822_fast::{Deb822, ParagraphReader};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A lazy reader over the paragraphs of one index file.
///
/// Malformed paragraphs are skipped and counted. A stream error (for example
/// a truncated compressed file) ends the iteration and is kept for the caller
/// to inspect through [`IndexReader::take_error`].
pub struct IndexReader {
    origin: String,
    paragraphs: ParagraphReader<Box<dyn BufRead>>,
    skipped: usize,
    error: Option<AptRepositoryError>,
}

impl IndexReader {
    /// Read an index from an already decompressed stream.
    pub fn from_reader<R: Read + 'static>(reader: R) -> Self {
        Self::with_origin("<stream>", reader)
    }

    fn with_origin<R: Read + 'static>(origin: &str, reader: R) -> Self {
        let buffered: Box<dyn BufRead> = Box::new(BufReader::new(reader));
        Self {
            origin: origin.to_string(),
            paragraphs: Deb822::iter_paragraphs_from_reader(buffered),
            skipped: 0,
            error: None,
        }
    }

    /// Open an index file, decompressing according to its suffix.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Compression::open(path)?;
        debug!("Reading index {}", path.display());
        Ok(Self::with_origin(&path.display().to_string(), reader))
    }

    /// Locate an index given its path without compression suffix, trying
    /// each of [`DEFAULT_COMPRESSIONS`] in turn.
    pub fn locate(stem: &Path) -> Result<PathBuf> {
        for compression in DEFAULT_COMPRESSIONS {
            let mut candidate = stem.as_os_str().to_owned();
            candidate.push(compression.extension());
            let candidate = PathBuf::from(candidate);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(AptRepositoryError::FileNotFound(stem.display().to_string()))
    }

    /// Number of malformed paragraphs skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Take the error that ended the iteration early, if any.
    pub fn take_error(&mut self) -> Option<AptRepositoryError> {
        self.error.take()
    }

    /// Iterate over well-formed paragraphs.
    pub fn paragraphs(&mut self) -> impl Iterator<Item = Paragraph> + '_ {
        self.records(|p| Ok(p.clone()))
    }

    /// Iterate over the source package records of a `Sources` index.
    pub fn sources(&mut self) -> impl Iterator<Item = Source> + '_ {
        self.records(Source::from_paragraph)
    }

    /// Iterate over the binary package records of a `Packages` index.
    pub fn packages(&mut self) -> impl Iterator<Item = Package> + '_ {
        self.records(Package::from_paragraph)
    }

    fn records<'a, T, F>(&'a mut self, parse: F) -> impl Iterator<Item = T> + 'a
    where
        F: Fn(&Paragraph) -> Result<T> + 'a,
    {
        std::iter::from_fn(move || loop {
            if self.error.is_some() {
                return None;
            }
            let result = self
                .paragraphs
                .next()?
                .map_err(paragraph_error)
                .and_then(|p| parse(&p));
            match result {
                Ok(record) => return Some(record),
                Err(e) if e.is_record_error() => {
                    self.skipped += 1;
                    warn!("Skipping malformed record in {}: {}", self.origin, e);
                }
                Err(e) => {
                    warn!("Stopped reading {}: {}", self.origin, e);
                    self.error = Some(e);
                    return None;
                }
            }
        })
    }
}

fn paragraph_error(e: deb822_fast::Error) -> AptRepositoryError {
    match e {
        deb822_fast::Error::Io(e) => e.into(),
        e => AptRepositoryError::invalid_paragraph(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGES: &str = "Package: a
Version: 1.0
Architecture: amd64
Filename: pool/main/a/a/a_1.0_amd64.deb

Package: broken
Architecture: amd64
Filename: pool/main/b/broken/broken_amd64.deb

Package: b
Version: 2.0
Architecture: all
Filename: pool/main/b/b/b_2.0_all.deb
";

    #[test]
    fn test_packages_skip_malformed() {
        let mut reader = IndexReader::from_reader(PACKAGES.as_bytes());
        let names: Vec<String> = reader.packages().map(|p| p.package).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reader.skipped(), 1);
        assert!(reader.take_error().is_none());
    }

    #[test]
    fn test_paragraphs_are_raw() {
        let mut reader = IndexReader::from_reader(PACKAGES.as_bytes());
        assert_eq!(reader.paragraphs().count(), 3);
        assert_eq!(reader.skipped(), 0);
    }

    #[test]
    fn test_reader_recovers_after_bad_paragraph() {
        let text = "Package: a\nVersion: 1\n\nthis is not a field\n\n\n\nPackage: b\nVersion: 2\n";
        let mut reader = IndexReader::from_reader(text.as_bytes());
        let names: Vec<String> = reader
            .paragraphs()
            .filter_map(|p| p.get("Package").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reader.skipped(), 1);
        assert!(reader.take_error().is_none());
    }

    #[test]
    fn test_continuation_lines() {
        let text = "Package: hello\nFiles:\n abc 12 hello.dsc\n def 34 hello.tar.xz\n";
        let mut reader = IndexReader::from_reader(text.as_bytes());
        let paragraph = reader.paragraphs().next().unwrap();
        assert_eq!(paragraph.get("package"), Some("hello"));
        assert_eq!(
            paragraph.get("Files").map(str::trim),
            Some("abc 12 hello.dsc\ndef 34 hello.tar.xz")
        );
    }

    #[test]
    fn test_open_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Packages.gz");
        std::fs::write(&path, Compression::Gzip.compress(PACKAGES.as_bytes()).unwrap()).unwrap();

        let mut reader = IndexReader::open(&path).unwrap();
        assert_eq!(reader.packages().count(), 2);
    }

    #[test]
    fn test_truncated_stream_sets_error() {
        let compressed = Compression::Gzip.compress(PACKAGES.as_bytes()).unwrap();
        let truncated = compressed[..compressed.len() / 2].to_vec();
        let mut reader = IndexReader::from_reader(Compression::Gzip.reader(std::io::Cursor::new(truncated)));
        let _ = reader.packages().count();
        assert!(reader.take_error().is_some());
    }

    #[test]
    fn test_locate_prefers_gzip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Sources.xz"), b"").unwrap();
        std::fs::write(dir.path().join("Sources"), b"").unwrap();

        let found = IndexReader::locate(&dir.path().join("Sources")).unwrap();
        assert_eq!(found, dir.path().join("Sources.xz"));

        std::fs::write(dir.path().join("Sources.gz"), b"").unwrap();
        let found = IndexReader::locate(&dir.path().join("Sources")).unwrap();
        assert_eq!(found, dir.path().join("Sources.gz"));

        assert!(matches!(
            IndexReader::locate(&dir.path().join("Packages")),
            Err(AptRepositoryError::FileNotFound(_))
        ));
    }
}
