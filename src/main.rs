use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playlist_harvester::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Quota-aware playlist and track harvester",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file; environment variables still apply on top
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop until interrupted
    Run {
        /// Serve the operational HTTP surface on this address
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run a single tick and exit
    Tick,

    /// Ingest explicit playlist ids
    Ingest {
        /// Playlist ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show cycle state, lock, credentials and row counts
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Clear a stuck single-flight lock
    ResetLock,

    /// Print or verify the seed query plan
    Plan {
        /// Check the plan size and per-slot distinctness
        #[arg(long)]
        verify: bool,

        /// Day in cycle (defaults to the current day)
        #[arg(long)]
        day: Option<u32>,

        /// Time slot (defaults to the slot of the current hour)
        #[arg(long)]
        slot: Option<u32>,

        /// Maximum number of queries to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, cli.verbose, &config.logging.level);

    if let Err(e) = config.validate() {
        tracing::error!(error = %format!("{e:#}"), "Invalid configuration");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run { listen } => {
            let listen = listen.or_else(|| config.server.listen.clone());
            tracing::info!(listen = ?listen, "Starting run command");
            commands::run(&config, listen).await
        }
        Commands::Tick => commands::tick(&config).await,
        Commands::Ingest { ids } => {
            tracing::info!(ids = ids.len(), "Starting ingest command");
            commands::ingest(&config, ids).await
        }
        Commands::Status { json } => commands::status(&config, json).await,
        Commands::ResetLock => commands::reset_lock(&config).await,
        Commands::Plan {
            verify,
            day,
            slot,
            limit,
        } => commands::plan(&config, verify, day, slot, limit).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn setup_tracing(format: &str, verbose: bool, level: &str) {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("playlist_harvester=debug,harvester=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("{level},hyper=warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
