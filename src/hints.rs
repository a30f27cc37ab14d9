//! Line-oriented hint files: block-lists, sync overrides, package sets and
//! the removal hints consumed by the migration tool.

use crate::cruft::RemovalCandidate;
use crate::report::write_atomic;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Entries of a list file, with `#` comments and blank lines removed.
///
/// A missing file is an empty list.
pub fn read_commented_list(path: &Path) -> Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No list file at {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .map(|line| line.split_once('#').map_or(line, |(before, _)| before).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parse `<suite>/<package>` lines into a package → suite map. Lines without
/// a suite are ignored.
pub fn read_suite_hints(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut hints = BTreeMap::new();
    for line in read_commented_list(path)? {
        match line.split_once('/') {
            Some((suite, package)) if !suite.is_empty() && !package.is_empty() => {
                hints.insert(package.trim().to_string(), suite.trim().to_string());
            }
            _ => warn!("Ignoring malformed hint {:?} in {}", line, path.display()),
        }
    }
    Ok(hints)
}

/// Sync hints read from the hints directory.
#[derive(Debug, Clone, Default)]
pub struct SyncHints {
    /// Packages that are never synced.
    pub blacklist: BTreeSet<String>,
    /// Packages exempt from the import freeze, with the suite to sync from.
    pub autosync_overrides: BTreeMap<String, String>,
    sets_dir: Option<PathBuf>,
}

impl SyncHints {
    /// Load hints from `dir`. Without a directory there are no hints.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = dir else {
            return Ok(Self::default());
        };

        let blacklist = read_commented_list(&dir.join("sync-blacklist.txt"))?
            .into_iter()
            .collect();

        let mut autosync_overrides = BTreeMap::new();
        let autosync = dir.join("autosync");
        if autosync.is_dir() {
            let mut lists: Vec<PathBuf> = std::fs::read_dir(&autosync)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.extension().is_some_and(|e| e == "list"))
                .collect();
            lists.sort();
            for list in lists {
                autosync_overrides.extend(read_suite_hints(&list)?);
            }
        }

        Ok(Self {
            blacklist,
            autosync_overrides,
            sets_dir: Some(dir.join("sets")),
        })
    }

    /// Packages named by the set file `sets/<name>.list`, mapped to the suite
    /// each should come from.
    pub fn set(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let dir = self
            .sets_dir
            .as_ref()
            .ok_or_else(|| Error::config("No sets directory defined"))?;
        let path = dir.join(format!("{}.list", name));
        if !path.is_file() {
            return Err(Error::config(format!("Found no set file for set '{}'", name)));
        }
        read_suite_hints(&path)
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.contains(name)
    }

    pub fn has_override(&self, name: &str) -> bool {
        self.autosync_overrides.contains_key(name)
    }
}

/// Rewrite the removal hints file with one `remove <name>/<version>` line per
/// candidate. Candidates sharing a reason are grouped under one comment.
pub fn write_removal_hints(
    path: &Path,
    candidates: &[RemovalCandidate],
    distro_name: &str,
    staging_suite: Option<&str>,
) -> Result<()> {
    let mut data = Vec::new();
    render_removal_hints(&mut data, candidates, distro_name)?;
    write_atomic(path, &data)?;

    if let Some(staging) = staging_suite {
        if candidates.iter().any(|c| c.suite == staging) {
            warn!("Attention! Wrote a removal hint for the staging suite {}", staging);
        }
    }
    Ok(())
}

fn render_removal_hints<W: Write>(
    out: &mut W,
    candidates: &[RemovalCandidate],
    distro_name: &str,
) -> std::io::Result<()> {
    writeln!(out, "##")?;
    writeln!(out, "# Hints file for the {} archive janitor", distro_name)?;
    writeln!(out, "##")?;

    let mut last_reason: Option<&str> = None;
    for candidate in candidates {
        if last_reason != Some(candidate.reason.as_str()) {
            writeln!(out)?;
            writeln!(out, "# {}", candidate.reason.replace('\n', "\n# "))?;
            last_reason = Some(candidate.reason.as_str());
        }
        writeln!(
            out,
            "remove {}/{}",
            candidate.package_name, candidate.local_version
        )?;
    }
    Ok(())
}
