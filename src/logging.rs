use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(clap::Args, Debug, Clone)]
#[group()]
pub struct LoggingArgs {
    /// Enable debug mode.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Emit log lines as JSON.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

impl LoggingArgs {
    pub fn init(&self) {
        init_logging(self.json_logs, self.debug);
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// debug switch.
pub fn init_logging(json: bool, debug_mode: bool) {
    let default_level = if debug_mode { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}
