//! The archive management tool that commits imports and removals.

use crate::config::ToolConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Messages the tool prints when the upload is already known.
const ALREADY_IN_POOL: &[&str] = &["already in pool", "already exists"];

/// What happened to an import request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported,
    /// The tool already had the upload; nothing changed.
    AlreadyInPool,
}

#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Import the source package described by `dsc` into `suite`.
    async fn import(&self, suite: &str, component: &str, dsc: &Path) -> Result<ImportOutcome>;

    /// Remove source package `name` from `suite`.
    async fn remove(&self, suite: &str, name: &str, reason: &str) -> Result<()>;
}

/// Runs the configured import and removal commands.
#[derive(Debug, Clone)]
pub struct CommandTool {
    import_command: Vec<String>,
    remove_command: Vec<String>,
    remove_contact: Option<String>,
}

fn split_command(command: &str) -> Result<Vec<String>> {
    match shlex::split(command) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        _ => Err(Error::config(format!("Invalid tool command: {:?}", command))),
    }
}

impl CommandTool {
    pub fn new(config: &ToolConfig) -> Result<Self> {
        Ok(Self {
            import_command: split_command(&config.import_command)?,
            remove_command: split_command(&config.remove_command)?,
            remove_contact: config.remove_contact.clone(),
        })
    }

    fn command(argv: &[String]) -> Command {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

fn is_already_in_pool(output: &str) -> bool {
    let output = output.to_lowercase();
    ALREADY_IN_POOL.iter().any(|m| output.contains(m))
}

#[async_trait]
impl ArchiveTool for CommandTool {
    async fn import(&self, suite: &str, component: &str, dsc: &Path) -> Result<ImportOutcome> {
        let package = dsc
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dsc.display().to_string());

        let mut cmd = Self::command(&self.import_command);
        cmd.arg(suite).arg(component).arg(dsc);
        cmd.stdin(Stdio::null());
        debug!("running {:?}", cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::import_failed(&package, e.to_string()))?;
        if output.status.success() {
            info!("Imported {} into {}/{}", package, suite, component);
            return Ok(ImportOutcome::Imported);
        }

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if is_already_in_pool(&text) {
            warn!("{} is already in the pool, skipping", package);
            return Ok(ImportOutcome::AlreadyInPool);
        }
        Err(Error::import_failed(
            package,
            format!("{}: {}", output.status, text.trim()),
        ))
    }

    async fn remove(&self, suite: &str, name: &str, reason: &str) -> Result<()> {
        let mut cmd = Self::command(&self.remove_command);
        cmd.arg(suite).arg("-m").arg(reason);
        if let Some(contact) = &self.remove_contact {
            cmd.arg("-C").arg(contact);
        }
        cmd.arg(name);
        cmd.stdin(Stdio::piped());
        debug!("running {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::import_failed(name, e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            // The tool asks for confirmation.
            stdin
                .write_all(b"y\n")
                .await
                .map_err(|e| Error::import_failed(name, e.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::import_failed(name, e.to_string()))?;

        if !output.status.success() {
            return Err(Error::import_failed(
                name,
                format!(
                    "{}: {}{}",
                    output.status,
                    String::from_utf8_lossy(&output.stdout).trim(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        info!("Removed {} from {}", name, suite);
        Ok(())
    }
}
