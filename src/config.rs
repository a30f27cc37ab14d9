//! Typed configuration for the archive workflows.
//!
//! Loaded once at startup, validated eagerly and then passed around by
//! reference inside a [`crate::context::RunContext`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Settings shared by every workflow.
    pub general: GeneralConfig,
    /// Suites of the local archive.
    pub archive: ArchiveConfig,
    /// Package synchronisation from upstream.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Cruft detection and removal.
    #[serde(default)]
    pub cruft: CruftConfig,
    /// External dependency solver.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Archive management tool.
    #[serde(default)]
    pub tool: ToolConfig,
    /// Number of index files parsed in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Name of the derivative; also the local-modification marker in versions.
    pub distro_name: String,
    /// Root of the local archive; indices live below `<root>/<distro>/dists`.
    pub archive_root: PathBuf,
    /// Root of the upstream mirror; indices live below `<mirror>/dists`.
    pub upstream_mirror: PathBuf,
    /// Directory that receives JSON reports.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

/// Archive layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Development suite, the default target of most workflows.
    pub devel_suite: String,
    /// Staging suite; it is not a complete suite and borrows from the devel suite.
    #[serde(default)]
    pub staging_suite: Option<String>,
    /// Root of the incoming build queues, if any suite uses one.
    #[serde(default)]
    pub build_queues_root: Option<PathBuf>,
    /// All suites of the archive.
    pub suites: Vec<SuiteConfig>,
}

/// A single suite of the local archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub name: String,
    /// Supported architectures, without `all`.
    pub archs: Vec<String>,
    pub components: Vec<String>,
    /// Build queue whose sources are merged into this suite's catalog.
    #[serde(default)]
    pub incoming_queue: Option<String>,
}

/// Synchronisation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upstream suite packages are synced from.
    #[serde(default = "default_source_suite")]
    pub source_suite: String,
    /// Freeze switch; when false only packages with overrides are imported.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding `sync-blacklist.txt`, `autosync/` and `sets/`.
    #[serde(default)]
    pub hints_dir: Option<PathBuf>,
    /// Run the build-dependency check before syncing.
    #[serde(default = "default_true")]
    pub buildcheck_before_sync: bool,
    /// Architecture the build-dependency check is run for.
    #[serde(default = "default_buildcheck_arch")]
    pub buildcheck_arch: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_suite: default_source_suite(),
            enabled: true,
            hints_dir: None,
            buildcheck_before_sync: true,
            buildcheck_arch: default_buildcheck_arch(),
        }
    }
}

/// Cruft detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CruftConfig {
    /// URL or local path of the upstream removal feed.
    #[serde(default = "default_removals_url")]
    pub removals_url: String,
    /// Hints file written in hints mode.
    #[serde(default)]
    pub hints_file: Option<PathBuf>,
    /// Upstream suites whose removals are ignored.
    #[serde(default = "default_ignored_suites")]
    pub ignored_suites: Vec<String>,
    /// Regular expressions matched against removal reasons to ignore.
    #[serde(default = "default_ignored_reasons")]
    pub ignored_reasons: Vec<String>,
    /// Also remove packages with uninstallable binaries.
    #[serde(default)]
    pub remove_uninstallable: bool,
}

impl Default for CruftConfig {
    fn default() -> Self {
        Self {
            removals_url: default_removals_url(),
            hints_file: None,
            ignored_suites: default_ignored_suites(),
            ignored_reasons: default_ignored_reasons(),
            remove_uninstallable: false,
        }
    }
}

/// Dependency solver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Installability checker for binary indices.
    #[serde(default = "default_debcheck")]
    pub debcheck: String,
    /// Build-dependency checker for source indices.
    #[serde(default = "default_builddebcheck")]
    pub builddebcheck: String,
    /// Timeout per solver invocation in seconds.
    #[serde(default = "default_solver_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            debcheck: default_debcheck(),
            builddebcheck: default_builddebcheck(),
            timeout_seconds: default_solver_timeout(),
        }
    }
}

/// Archive tool configuration. Commands are split like a shell would.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Command prefix for imports; suite, component and `.dsc` are appended.
    #[serde(default = "default_import_command")]
    pub import_command: String,
    /// Command prefix for removals; suite, message, contact and name are appended.
    #[serde(default = "default_remove_command")]
    pub remove_command: String,
    /// Contact address recorded with removals.
    #[serde(default)]
    pub remove_contact: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            import_command: default_import_command(),
            remove_command: default_remove_command(),
            remove_contact: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}
fn default_source_suite() -> String {
    "unstable".to_string()
}
fn default_buildcheck_arch() -> String {
    "amd64".to_string()
}
fn default_removals_url() -> String {
    "https://ftp-master.debian.org/removals.822".to_string()
}
fn default_ignored_suites() -> Vec<String> {
    vec!["experimental".to_string()]
}
fn default_ignored_reasons() -> Vec<String> {
    vec!["^NBS".to_string(), "^ANAIS".to_string()]
}
fn default_debcheck() -> String {
    "dose-debcheck".to_string()
}
fn default_builddebcheck() -> String {
    "dose-builddebcheck".to_string()
}
fn default_solver_timeout() -> u64 {
    1800
}
fn default_import_command() -> String {
    "dak import -s -a".to_string()
}
fn default_remove_command() -> String {
    "dak rm -s".to_string()
}

impl Config {
    /// Load configuration from a file.
    ///
    /// The format is picked from the extension; files with an unknown
    /// extension are tried as TOML, JSON and YAML in turn.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            _ => Self::from_str_any(&content)?,
        };
        Ok(config)
    }

    fn from_str_any(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = toml::from_str(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_json::from_str(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_yaml::from_str(content) {
            return Ok(config);
        }

        Err(ConfigError::Parse(
            "Unable to parse config file as TOML, JSON, or YAML".to_string(),
        ))
    }

    /// Load and validate in one step.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.distro_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Distribution name cannot be empty".to_string(),
            ));
        }

        if self.archive.suites.is_empty() {
            return Err(ConfigError::Validation(
                "At least one suite must be configured".to_string(),
            ));
        }

        for suite in &self.archive.suites {
            if suite.archs.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Suite {} has no architectures",
                    suite.name
                )));
            }
            if suite.components.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Suite {} has no components",
                    suite.name
                )));
            }
            if suite.incoming_queue.is_some() && self.archive.build_queues_root.is_none() {
                return Err(ConfigError::Validation(format!(
                    "Suite {} uses an incoming queue but build_queues_root is not set",
                    suite.name
                )));
            }
        }

        if self.suite(&self.archive.devel_suite).is_none() {
            return Err(ConfigError::Validation(format!(
                "Devel suite {} is not a configured suite",
                self.archive.devel_suite
            )));
        }

        if let Some(staging) = &self.archive.staging_suite {
            if self.suite(staging).is_none() {
                return Err(ConfigError::Validation(format!(
                    "Staging suite {} is not a configured suite",
                    staging
                )));
            }
        }

        if self.solver.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Solver timeout must be greater than 0".to_string(),
            ));
        }

        if self.workers == 0 {
            return Err(ConfigError::Validation(
                "Number of workers must be greater than 0".to_string(),
            ));
        }

        self.ignored_reason_patterns()?;

        for command in [&self.tool.import_command, &self.tool.remove_command] {
            if shlex::split(command).map_or(true, |argv| argv.is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "Invalid tool command: {:?}",
                    command
                )));
            }
        }

        Ok(())
    }

    /// Look up a suite by name.
    pub fn suite(&self, name: &str) -> Option<&SuiteConfig> {
        self.archive.suites.iter().find(|s| s.name == name)
    }

    /// Look up a suite, falling back to its base suite (`staging-foo` and
    /// `buildq-foo` share the settings of their base).
    pub fn suite_or_base(&self, name: &str) -> Option<&SuiteConfig> {
        self.suite(name)
            .or_else(|| self.suite(&crate::layout::base_suite(name)))
    }

    /// Suite whose indices fill in the gaps of `suite`, if any.
    pub fn overlay_suite(&self, suite: &str) -> Option<&str> {
        match &self.archive.staging_suite {
            Some(staging) if staging == suite && *staging != self.archive.devel_suite => {
                Some(self.archive.devel_suite.as_str())
            }
            _ => None,
        }
    }

    /// Compiled `cruft.ignored_reasons`.
    pub fn ignored_reason_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.cruft
            .ignored_reasons
            .iter()
            .map(|r| {
                Regex::new(r).map_err(|e| {
                    ConfigError::Validation(format!("Invalid ignored reason {:?}: {}", r, e))
                })
            })
            .collect()
    }

    pub fn solver_timeout(&self) -> Duration {
        Duration::from_secs(self.solver.timeout_seconds)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for crate::Error {
    fn from(e: ConfigError) -> Self {
        crate::Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const EXAMPLE_YAML: &str = r#"
general:
  distro_name: tanglu
  archive_root: /srv/archive
  upstream_mirror: /srv/mirror/debian
archive:
  devel_suite: chromodoris
  staging_suite: staging
  suites:
    - name: chromodoris
      archs: [amd64, i386]
      components: [main, contrib, non-free]
    - name: staging
      archs: [amd64, i386]
      components: [main, contrib, non-free]
"#;

    fn example() -> Config {
        serde_yaml::from_str(EXAMPLE_YAML).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = example();
        config.validate().unwrap();
        assert_eq!(config.sync.source_suite, "unstable");
        assert!(config.sync.enabled);
        assert_eq!(config.cruft.ignored_suites, vec!["experimental"]);
        assert_eq!(config.solver.debcheck, "dose-debcheck");
        assert_eq!(config.solver_timeout(), Duration::from_secs(1800));
        assert_eq!(config.tool.import_command, "dak import -s -a");
        assert!(config.workers > 0);
    }

    #[test]
    fn test_overlay_suite() {
        let config = example();
        assert_eq!(config.overlay_suite("staging"), Some("chromodoris"));
        assert_eq!(config.overlay_suite("chromodoris"), None);
    }

    #[test]
    fn test_suite_or_base() {
        let config = example();
        assert_eq!(
            config.suite_or_base("chromodoris-updates").map(|s| s.name.as_str()),
            Some("chromodoris")
        );
        assert!(config.suite_or_base("unknown").is_none());
    }

    #[test]
    fn test_validate_rejects_unknown_devel_suite() {
        let mut config = example();
        config.archive.devel_suite = "sid".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_empty_archs() {
        let mut config = example();
        config.archive.suites[1].archs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let mut config = example();
        config.cruft.ignored_reasons.push("(".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = example();
        config.solver.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let mut file = tempfile::Builder::new().suffix(".conf").tempfile().unwrap();
        file.write_all(EXAMPLE_YAML.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.general.distro_name, "tanglu");
    }

    #[test]
    fn test_from_file_json() {
        let json = serde_json::to_string(&example()).unwrap();
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.archive.suites.len(), 2);
    }
}
