use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod backend;
mod commands;
mod config;
mod services;

/// Env var overriding the log filter
const LOG_ENV: &str = "COURIER_LOG";

#[derive(Parser)]
#[command(name = "courier", about = "Event broker demo and stream tools")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./courier.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the auction scenario end to end
    Demo(commands::demo::DemoArgs),
    /// Show the most recent records of an event type
    History(commands::history::HistoryArgs),
    /// Show stream metadata
    Info(commands::info::InfoArgs),
    /// Re-deliver stored records to a printing handler
    Replay(commands::replay::ReplayArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo(args) => commands::demo::run(args, &config).await,
        Commands::History(args) => commands::history::run(args, &config).await,
        Commands::Info(args) => commands::info::run(args, &config).await,
        Commands::Replay(args) => commands::replay::run(args, &config).await,
    }
}
