//! Report files written for downstream tooling.
//!
//! Every report is a full rewrite: the content goes to a temporary file in
//! the target directory which then replaces the old report.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Replace the file at `path` with `data`, creating parent directories.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// A report body stamped with the time it was generated.
#[derive(Debug, Serialize)]
pub struct Stamped<'a, T: Serialize> {
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: &'a T,
}

/// Write `body` as pretty JSON to `<dir>/<name>.json`.
pub fn write_json_report<T: Serialize>(dir: &Path, name: &str, body: &T) -> Result<PathBuf> {
    let path = dir.join(format!("{}.json", name));
    let stamped = Stamped {
        generated_at: Utc::now(),
        body,
    };
    let mut data = serde_json::to_vec_pretty(&stamped)?;
    data.push(b'\n');
    write_atomic(&path, &data)?;
    info!("Wrote report {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Body {
        component: String,
        entries: Vec<u32>,
    }

    #[test]
    fn test_write_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let body = Body {
            component: "main".to_string(),
            entries: vec![1, 2],
        };
        let path = write_json_report(&dir.path().join("sync"), "issues_main", &body).unwrap();
        assert_eq!(path, dir.path().join("sync/issues_main.json"));

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["component"], "main");
        assert_eq!(value["entries"], serde_json::json!([1, 2]));
        assert!(value["generated_at"].is_string());
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
