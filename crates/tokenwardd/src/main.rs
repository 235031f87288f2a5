//! tokenwardd: the tokenward daemon.
//!
//! Single binary that assembles the renewal subsystems:
//! - Credential store (JSON file)
//! - Token executor (`vault` CLI)
//! - Notifier (log or desktop command)
//! - Renewal scheduler
//! - Health server (`/health`, `/metrics`)
//!
//! # Usage
//!
//! ```text
//! tokenwardd run --config /etc/tokenward/tokenward.toml
//! tokenwardd check --config tokenward.toml
//! tokenwardd revoke --config tokenward.toml --connection prod
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tokenwardd::daemon;

const DEFAULT_LOG_FILTER: &str = "info,tokenward=debug";

#[derive(Parser)]
#[command(name = "tokenwardd", about = "Credential renewal daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the renewal loop and health server until stopped.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, short)]
        config: PathBuf,

        /// Health server bind host (overrides the config file).
        #[arg(long)]
        health_host: Option<String>,

        /// Health server port (overrides the config file).
        #[arg(long)]
        health_port: Option<u16>,
    },

    /// Run a single check cycle and print the report as JSON.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Revoke a connection's stored credential and remove it from the store.
    Revoke {
        #[arg(long, short)]
        config: PathBuf,

        /// Name of the connection to revoke.
        #[arg(long)]
        connection: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            health_host,
            health_port,
        } => daemon::run(&config, health_host, health_port).await,
        Command::Check { config } => daemon::check(&config).await,
        Command::Revoke { config, connection } => daemon::revoke(&config, &connection).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
