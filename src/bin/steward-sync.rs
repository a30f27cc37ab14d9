use archive_steward::config::Config;
use archive_steward::context::RunContext;
use archive_steward::sync::{BatchResult, SyncTarget, Synchronizer};
use archive_steward::tool::{ArchiveTool, CommandTool};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
/// Import newer source packages from the upstream archive.
struct Args {
    #[clap(long, default_value = "steward.yaml", env = "STEWARD_CONFIG")]
    /// Path to configuration.
    config: PathBuf,

    #[clap(long)]
    /// Show what would be imported without importing anything.
    dry_run: bool,

    #[clap(long)]
    /// Upstream suite to sync from; defaults to the configured source suite.
    source_suite: Option<String>,

    #[clap(long)]
    /// Local suite to import into; defaults to staging, or devel without one.
    target_suite: Option<String>,

    #[clap(long)]
    /// Components to process; defaults to those of the target suite.
    component: Vec<String>,

    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    logging: archive_steward::logging::LoggingArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Sync everything that is newer upstream and write the issue report.
    All,
    /// Sync the named packages.
    Package {
        names: Vec<String>,
        #[clap(long)]
        /// Import even over local modifications or unsatisfiable build
        /// dependencies.
        force: bool,
    },
    /// Sync packages whose name matches a regular expression.
    Matching {
        pattern: String,
        #[clap(long)]
        force: bool,
    },
    /// Sync the packages of a set from the hints directory.
    Set { name: String },
}

fn report_batch(result: &BatchResult) -> Result<(), u8> {
    let failed: Vec<&str> = result.failures().collect();
    if failed.is_empty() {
        Ok(())
    } else {
        error!("Unable to sync: {}", failed.join(", "));
        Err(2)
    }
}

async fn run(args: Args) -> Result<(), u8> {
    let config = Config::load(&args.config).map_err(|e| {
        error!("Unable to load {}: {}", args.config.display(), e);
        1
    })?;
    let tool: Arc<dyn ArchiveTool> = Arc::new(CommandTool::new(&config.tool).map_err(|e| {
        error!("{}", e);
        1
    })?);

    let source_suite = args
        .source_suite
        .clone()
        .unwrap_or_else(|| config.sync.source_suite.clone());
    let target_suite = args.target_suite.clone().unwrap_or_else(|| {
        config
            .archive
            .staging_suite
            .clone()
            .unwrap_or_else(|| config.archive.devel_suite.clone())
    });

    let ctx = RunContext::new(config).map_err(|e| {
        error!("{}", e);
        1
    })?;
    let components = if args.component.is_empty() {
        ctx.suite_config(&target_suite)
            .map_err(|e| {
                error!("{}", e);
                1
            })?
            .components
            .clone()
    } else {
        args.component.clone()
    };

    let mut status = Ok(());
    for component in components {
        let target = SyncTarget {
            source_suite: source_suite.clone(),
            target_suite: target_suite.clone(),
            component: component.clone(),
        };
        let sync = Synchronizer::initialize(&ctx, target, tool.clone())
            .await
            .map_err(|e| {
                error!("Unable to prepare sync of {}: {}", component, e);
                if e.is_fatal_for_run() {
                    1
                } else {
                    2
                }
            })?
            .with_dry_run(args.dry_run);

        let outcome = match &args.command {
            Command::All => {
                let report = sync.sync_all().await;
                if !args.dry_run {
                    match Synchronizer::write_report(&ctx, &report) {
                        Ok(path) => info!("Wrote sync report to {}", path.display()),
                        Err(e) => error!("Unable to write sync report: {}", e),
                    }
                }
                if report.import_errors.is_empty() {
                    Ok(())
                } else {
                    Err(2)
                }
            }
            Command::Package { names, force } => {
                report_batch(&sync.sync_packages(names, *force).await)
            }
            Command::Matching { pattern, force } => {
                let result = sync.sync_matching(pattern, *force).await.map_err(|e| {
                    error!("{}", e);
                    1
                })?;
                report_batch(&result)
            }
            Command::Set { name } => {
                let result = sync.sync_set(name).await.map_err(|e| {
                    error!("{}", e);
                    1
                })?;
                report_batch(&result)
            }
        };
        status = status.and(outcome);
    }
    status
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    args.logging.init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}
