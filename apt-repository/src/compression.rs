//! Compression support for APT repository files.

use crate::{AptRepositoryError, Result};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

/// Supported compression formats for APT repository files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    Gzip,
    /// XZ (LZMA2) compression.
    Xz,
    /// Bzip2 compression.
    Bzip2,
}

impl Compression {
    /// Get the file extension for this compression format.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Xz => ".xz",
            Compression::Bzip2 => ".bz2",
        }
    }

    /// Pick the compression format from a file name suffix.
    ///
    /// Anything without a known suffix is treated as plain text.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("xz") => Compression::Xz,
            Some("bz2") => Compression::Bzip2,
            _ => Compression::None,
        }
    }

    /// Create a decompressor that implements Read.
    pub fn reader<R: Read + 'static>(self, reader: R) -> Box<dyn Read> {
        match self {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
        }
    }

    /// Open a file and wrap it in the matching decompressor.
    pub fn open(path: &Path) -> Result<Box<dyn Read>> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AptRepositoryError::FileNotFound(path.display().to_string())
            }
            _ => AptRepositoryError::Io(e),
        })?;
        Ok(Self::from_path(path).reader(BufReader::new(file)))
    }

    /// Compress data using this compression format.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Decompress data using this compression format.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        self.reader(std::io::Cursor::new(data.to_vec()))
            .read_to_end(&mut decompressed)
            .map_err(|e| AptRepositoryError::Compression(format!("{}: {}", self, e)))?;
        Ok(decompressed)
    }

    /// Get all supported compression formats.
    pub fn all() -> &'static [Compression] {
        &[
            Compression::None,
            Compression::Gzip,
            Compression::Xz,
            Compression::Bzip2,
        ]
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Xz => write!(f, "xz"),
            Compression::Bzip2 => write!(f, "bzip2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_compression_from_path() {
        assert_eq!(
            Compression::from_path(&PathBuf::from("dists/sid/main/source/Sources.gz")),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_path(&PathBuf::from("Sources.xz")),
            Compression::Xz
        );
        assert_eq!(
            Compression::from_path(&PathBuf::from("Packages.bz2")),
            Compression::Bzip2
        );
        assert_eq!(
            Compression::from_path(&PathBuf::from("Packages")),
            Compression::None
        );
    }

    #[test]
    fn test_gzip_compression() -> Result<()> {
        let data = b"Package: hello\n";
        let compressed = Compression::Gzip.compress(data)?;
        assert_ne!(compressed, data);
        assert_eq!(Compression::Gzip.decompress(&compressed)?, data);
        Ok(())
    }

    #[test]
    fn test_xz_compression() -> Result<()> {
        let data = b"Package: hello\n";
        let compressed = Compression::Xz.compress(data)?;
        assert_ne!(compressed, data);
        assert_eq!(Compression::Xz.decompress(&compressed)?, data);
        Ok(())
    }

    #[test]
    fn test_open_missing_file() {
        let err = match Compression::open(Path::new("/nonexistent/Sources.gz")) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, AptRepositoryError::FileNotFound(_)));
    }
}
