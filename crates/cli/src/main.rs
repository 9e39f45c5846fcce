mod config_commands;
mod methods;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    strata_common::AppInfo,
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "strata", version, about = "Expand and check service configuration files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory relative configuration paths resolve against.
    #[arg(long, global = true, env = "STRATA_WORK_DIR")]
    work_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, expand and validate a configuration file.
    Check {
        file: String,
        /// Print the expanded text after checking.
        #[arg(long)]
        print: bool,
        /// With --print, do not mask secrets.
        #[arg(long, requires = "print")]
        raw: bool,
    },
    /// Print the expanded configuration with secrets masked.
    Expand { file: String },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "strata starting");

    let mut app = AppInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .with_full_name(concat!("Strata configuration tool ", env!("CARGO_PKG_VERSION")));
    if let Some(dir) = cli.work_dir {
        app = app.with_work_dir(dir);
    }

    match cli.command {
        Commands::Check { file, print, raw } => config_commands::check(app, &file, print, raw),
        Commands::Expand { file } => config_commands::expand(app, &file),
    }
}
