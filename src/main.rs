use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use freightline::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "freightline",
    version,
    about = "Driver-load assignment service with audit trail and event stream",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the assignment HTTP API
    Serve {
        /// Use process-local store, cache, event bus and audit sink
        #[arg(long, default_value = "false")]
        in_memory: bool,

        /// Insert demo drivers and loads at startup (in-memory mode only)
        #[arg(long, default_value = "false")]
        seed: bool,
    },

    /// Record assignment events from the event stream in the audit trail
    Worker,

    /// Create database tables and indexes
    Migrate {
        /// Also insert demo drivers and loads
        #[arg(long, default_value = "false")]
        seed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.level, &config.logging.format, cli.verbose)?;

    if let Err(e) = freightline::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    match cli.command {
        Commands::Serve { in_memory, seed } => {
            tracing::info!(in_memory, seed, "Starting serve command");
            commands::serve(&config, commands::ServeParams { in_memory, seed }).await?;
        }

        Commands::Worker => {
            tracing::info!("Starting worker command");
            commands::worker(&config).await?;
        }

        Commands::Migrate { seed } => {
            tracing::info!(seed, "Starting migrate command");
            commands::migrate(&config, seed).await?;
        }
    }

    Ok(())
}

fn setup_tracing(level: &str, format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("freightline=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!(
                "freightline={level},tower_http={level},warn"
            ))
        })
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
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
