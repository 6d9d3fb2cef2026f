//! `courier info` - stream metadata

use anyhow::Result;
use clap::Args;
use courier_core::StreamInfo;

use super::AUCTION_EVENT_TYPES;
use crate::backend;
use crate::config::CourierConfig;

/// Arguments for the `info` command
#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Event types to describe (defaults to the auction events)
    pub event_types: Vec<String>,
}

impl InfoArgs {
    fn resolved_types(&self) -> Vec<String> {
        if self.event_types.is_empty() {
            AUCTION_EVENT_TYPES.iter().map(|t| t.to_string()).collect()
        } else {
            self.event_types.clone()
        }
    }
}

pub async fn run(args: InfoArgs, config: &CourierConfig) -> Result<()> {
    backend::warn_if_ephemeral();
    let broker = backend::open_durable(config).await?;

    for event_type in args.resolved_types() {
        let info = broker.get_stream_info(&event_type).await?;
        print_info(&broker.config().stream_name(&event_type), &info);
    }

    broker.close().await?;
    Ok(())
}

fn id_or_na(id: Option<courier_core::RecordId>) -> String {
    id.map_or_else(|| "N/A".to_string(), |id| id.to_string())
}

pub fn print_info(stream: &str, info: &StreamInfo) {
    println!("Stream: {}", stream);
    println!("  Total events:    {}", info.length);
    println!("  First entry ID:  {}", id_or_na(info.first_id));
    println!("  Last entry ID:   {}", id_or_na(info.last_id));
    println!("  Consumer groups: {}", info.group_count);
}
