use archive_steward::config::Config;
use archive_steward::context::RunContext;
use archive_steward::rebuild::{
    batch_candidates, plan_rebuild, rebuild_catalog, DchSourcePreparer, Rebuilder,
};
use archive_steward::tool::CommandTool;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
/// Trigger no-change rebuilds of source packages.
struct Args {
    #[clap(long, default_value = "steward.yaml", env = "STEWARD_CONFIG")]
    /// Path to configuration.
    config: PathBuf,

    #[clap(long)]
    /// Show the planned rebuilds without building anything.
    dry_run: bool,

    #[clap(long, short = 'n')]
    /// What the rebuild is against, e.g. `perl-5.18`.
    note: String,

    #[clap(long, short = 'b')]
    /// Treat the package as a changed dependency and rebuild everything that
    /// depends on it.
    batch: bool,

    /// Suite the package lives in.
    suite: String,

    /// Component of the package.
    component: String,

    /// Package to rebuild, or the changed dependency with `--batch`.
    package: String,

    #[clap(flatten)]
    logging: archive_steward::logging::LoggingArgs,
}

async fn run(args: Args) -> Result<(), u8> {
    if args.note.trim().is_empty() {
        error!("No build note set; specify what the rebuild is against");
        return Err(1);
    }
    let config = Config::load(&args.config).map_err(|e| {
        error!("Unable to load {}: {}", args.config.display(), e);
        1
    })?;
    let tool = CommandTool::new(&config.tool).map_err(|e| {
        error!("{}", e);
        1
    })?;
    let ctx = RunContext::new(config).map_err(|e| {
        error!("{}", e);
        1
    })?;

    let names = if args.batch {
        let names = batch_candidates(&ctx, &args.suite, &args.component, &args.package)
            .await
            .map_err(|e| {
                error!("{}", e);
                1
            })?;
        if names.is_empty() {
            println!("No matching packages found.");
            return Ok(());
        }
        println!("Packages planned for rebuild:\n{}", names.join("\n"));
        names
    } else {
        vec![args.package.clone()]
    };

    let (target, catalog) = rebuild_catalog(&ctx, &args.suite, &args.component)
        .await
        .map_err(|e| {
            error!("{}", e);
            2
        })?;
    let rebuilder =
        Rebuilder::new(Arc::new(DchSourcePreparer), Arc::new(tool)).with_dry_run(args.dry_run);

    let mut status = Ok(());
    for name in names {
        let result = match plan_rebuild(&catalog, ctx.local_layout(), &target, &name, &args.note) {
            Ok(plan) => rebuilder.rebuild(&plan).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!("Rebuild of {} done", name),
            Err(e) => {
                error!("Unable to rebuild {}: {}", name, e);
                status = Err(2);
            }
        }
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
