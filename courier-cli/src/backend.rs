//! Broker construction for the selected backend

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use courier_core::{DurableBroker, EventRegistry};
use courier_log::LogStore;

use crate::config::CourierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process fan-out, nothing persisted
    Memory,
    /// Log-backed broker with consumer groups
    Durable,
}

#[cfg(feature = "iggy")]
async fn open_store(config: &CourierConfig) -> Result<Arc<dyn LogStore>> {
    let store = courier_log::IggyLogStore::new(config.iggy.clone())
        .context("Failed to create Iggy client")?;
    store
        .connect()
        .await
        .with_context(|| format!("Failed to connect to Iggy at {}", config.iggy.address))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "iggy"))]
async fn open_store(_config: &CourierConfig) -> Result<Arc<dyn LogStore>> {
    tracing::info!("Built without the iggy feature; using a process-local log store");
    Ok(Arc::new(courier_log::MemoryLogStore::new()))
}

/// Open a durable broker over the configured store.
pub async fn open_durable(config: &CourierConfig) -> Result<DurableBroker> {
    let store = open_store(config).await?;
    let broker = DurableBroker::open(
        store,
        Arc::new(EventRegistry::with_auction_events()),
        config.broker.clone(),
    )
    .await
    .context("Failed to open durable broker")?;
    Ok(broker)
}

/// Warn when reads cannot see anything written by earlier runs.
pub fn warn_if_ephemeral() {
    if !cfg!(feature = "iggy") {
        tracing::warn!(
            "The process-local store starts empty; build with --features iggy to read persisted streams"
        );
    }
}
