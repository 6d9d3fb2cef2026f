//! `courier replay` - re-deliver stored records to a printing handler
//!
//! Replay is a side read: no consumer group is created and nothing is
//! acknowledged.

use anyhow::{Context, Result};
use clap::Args;
use courier_core::{Event, HandlerResult, RecordId, handler_fn};

use crate::backend;
use crate::config::CourierConfig;

/// Arguments for the `replay` command
#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Event type, e.g. AuctionEnded
    pub event_type: String,

    /// First record id, inclusive ("0" for the whole stream)
    #[arg(long, default_value = "0")]
    pub from: RecordId,

    /// Maximum records to replay
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

async fn print_event(event: Event) -> HandlerResult {
    println!("  Replayed: {:?}", event);
    Ok(())
}

pub async fn run(args: ReplayArgs, config: &CourierConfig) -> Result<()> {
    backend::warn_if_ephemeral();
    let broker = backend::open_durable(config).await?;

    println!("Replaying {} from {}:", args.event_type, args.from);
    let report = broker
        .replay_to(
            &args.event_type,
            args.from,
            args.count,
            &[handler_fn("printer", print_event)],
        )
        .await
        .with_context(|| format!("Failed to replay {}", args.event_type))?;
    println!("Replayed {} events.", report.replayed);

    broker.close().await?;
    Ok(())
}
