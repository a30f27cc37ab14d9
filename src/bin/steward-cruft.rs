use archive_steward::config::Config;
use archive_steward::context::RunContext;
use archive_steward::cruft::{collect_cruft, write_not_in_upstream_report, CruftRemover, RemovalMode};
use archive_steward::tool::CommandTool;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// List the candidates.
    DryRun,
    /// Write removal hints for the migration tool.
    Hints,
    /// Remove the candidates with the archive tool.
    Remove,
}

#[derive(Parser)]
/// Find packages that should leave the archive.
struct Args {
    #[clap(long, default_value = "steward.yaml", env = "STEWARD_CONFIG")]
    /// Path to configuration.
    config: PathBuf,

    #[clap(long)]
    /// Suite to clean; defaults to the devel suite.
    suite: Option<String>,

    #[clap(long, value_enum, default_value_t = Mode::DryRun)]
    /// What to do with the candidates.
    mode: Mode,

    #[clap(long)]
    /// Also flag uninstallable packages. Overrides the configuration.
    uninstallable: bool,

    #[clap(long)]
    /// Write the report of local packages missing upstream instead.
    report: bool,

    #[clap(flatten)]
    logging: archive_steward::logging::LoggingArgs,
}

async fn run(args: Args) -> Result<(), u8> {
    let config = Config::load(&args.config).map_err(|e| {
        error!("Unable to load {}: {}", args.config.display(), e);
        1
    })?;

    let mode = match args.mode {
        Mode::DryRun => RemovalMode::DryRun,
        Mode::Hints => match &config.cruft.hints_file {
            Some(path) => RemovalMode::Hints(path.clone()),
            None => {
                error!("No hints file configured");
                return Err(1);
            }
        },
        Mode::Remove => match CommandTool::new(&config.tool) {
            Ok(tool) => RemovalMode::Tool(Arc::new(tool)),
            Err(e) => {
                error!("{}", e);
                return Err(1);
            }
        },
    };
    let suite = args
        .suite
        .clone()
        .unwrap_or_else(|| config.archive.devel_suite.clone());
    let uninstallable = args.uninstallable || config.cruft.remove_uninstallable;
    let remover = CruftRemover::new(mode, &config);

    let ctx = RunContext::new(config).map_err(|e| {
        error!("{}", e);
        1
    })?;

    if args.report {
        return match write_not_in_upstream_report(&ctx).await {
            Ok(path) => {
                info!("Wrote cruft report to {}", path.display());
                Ok(())
            }
            Err(e) => {
                error!("Unable to write cruft report: {}", e);
                Err(2)
            }
        };
    }

    let candidates = collect_cruft(&ctx, &suite, uninstallable)
        .await
        .map_err(|e| {
            error!("Unable to collect cruft for {}: {}", suite, e);
            if e.is_fatal_for_run() {
                1
            } else {
                2
            }
        })?;
    info!("{} packages flagged for removal from {}", candidates.len(), suite);

    let summary = remover.apply(&candidates).await.map_err(|e| {
        error!("{}", e);
        2
    })?;
    for (name, e) in &summary.failed {
        warn!("Unable to remove {}: {}", name, e);
    }
    if summary.failed.is_empty() {
        Ok(())
    } else {
        Err(2)
    }
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
