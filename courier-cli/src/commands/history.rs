//! `courier history` - most recent records of one event type

use anyhow::{Context, Result};
use clap::Args;
use courier_core::HistoryEntry;

use crate::backend;
use crate::config::CourierConfig;

/// Arguments for the `history` command
#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Event type, e.g. AuctionEnded
    pub event_type: String,

    /// Maximum records to show
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: usize,

    /// Print one JSON object per line
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: HistoryArgs, config: &CourierConfig) -> Result<()> {
    backend::warn_if_ephemeral();
    let broker = backend::open_durable(config).await?;

    let entries = broker
        .get_history(&args.event_type, args.count)
        .await
        .with_context(|| format!("Failed to read history of {}", args.event_type))?;
    print_entries(&args.event_type, &entries, args.json)?;

    broker.close().await?;
    Ok(())
}

/// Print history newest first.
pub fn print_entries(event_type: &str, entries: &[HistoryEntry], json: bool) -> Result<()> {
    if json {
        for entry in entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("No {} events found.", event_type);
        return Ok(());
    }

    println!("Found {} {} events:", entries.len(), event_type);
    for entry in entries {
        println!("  - ID: {}", entry.id);
        for (key, value) in entry.data.iter() {
            println!("    {}: {}", key, value);
        }
    }
    Ok(())
}
