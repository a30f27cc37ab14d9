//! Test utilities shared by the unit tests.

use crate::catalog::PackageRecord;
use crate::config::Config;
use apt_repository::Compression;
use std::path::{Path, PathBuf};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging once per process.
pub fn init_test_env() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// A devel/main record supporting every architecture.
pub fn record(name: &str, version: &str) -> PackageRecord {
    PackageRecord::new(name, version, "devel", "main").with_architectures("any")
}

/// Write an index file compressed according to its extension, creating
/// parent directories as needed.
pub fn write_index(path: &Path, text: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let data = Compression::from_path(path)
        .compress(text.as_bytes())
        .unwrap();
    std::fs::write(path, data).unwrap();
    path.to_path_buf()
}

/// A source paragraph with the mandatory fields.
pub fn source_paragraph(name: &str, version: &str, archs: &str, component: &str) -> String {
    let prefix = if name.starts_with("lib") && name.len() > 3 {
        &name[..4]
    } else {
        &name[..1]
    };
    format!(
        "Package: {name}\nVersion: {version}\nArchitecture: {archs}\nMaintainer: Someone <someone@example.com>\nDirectory: pool/{component}/{prefix}/{name}\nFiles:\n 00 1 {name}_{noepoch}.dsc\n\n",
        noepoch = crate::version::strip_epoch(version),
    )
}

/// Configuration for an archive rooted at `root` with a mirror next to it.
pub fn test_config(root: &Path) -> Config {
    let yaml = format!(
        r#"
general:
  distro_name: tanglu
  archive_root: {root}/archive
  upstream_mirror: {root}/mirror
  report_dir: {root}/reports
archive:
  devel_suite: devel
  staging_suite: staging
  suites:
    - name: devel
      archs: [amd64, i386]
      components: [main, contrib]
    - name: staging
      archs: [amd64, i386]
      components: [main, contrib]
sync:
  hints_dir: {root}/hints
  buildcheck_before_sync: false
cruft:
  removals_url: {root}/removals.822
  hints_file: {root}/hints.txt
workers: 2
"#,
        root = root.display()
    );
    let config: Config = serde_yaml::from_str(&yaml).unwrap();
    config.validate().unwrap();
    config
}
