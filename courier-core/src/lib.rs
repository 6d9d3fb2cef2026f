//! courier-core: type-based event brokers over an append-only log
//!
//! This crate provides:
//!
//! - **Durable broker** - [`DurableBroker`] with per-type streams, consumer
//!   groups, at-least-once delivery, replay and history
//! - **In-memory broker** - [`InMemoryBroker`] for in-process fan-out
//! - **Typed events** - [`Event`] variants rebuilt from payloads by an
//!   ordered [`EventRegistry`]
//! - **Handlers** - [`EventHandler`] with failures contained at dispatch
//! - **Wire form** - [`Payload`] and the two-field record encoding in [`wire`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use courier_core::{
//!     AuctionEnded, BrokerConfig, DurableBroker, Event, EventRegistry, HandlerResult, handler_fn,
//! };
//! use courier_log::MemoryLogStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = DurableBroker::open(
//!         Arc::new(MemoryLogStore::new()),
//!         Arc::new(EventRegistry::with_auction_events()),
//!         BrokerConfig::default(),
//!     )
//!     .await?;
//!
//!     let on_end = handler_fn("settle", |event: Event| async move {
//!         if let Event::AuctionEnded(ended) = event {
//!             println!("auction {} sold for {}", ended.auction_id, ended.winning_price);
//!         }
//!         HandlerResult::Ok(())
//!     });
//!     broker.subscribe_in_group("AuctionEnded", "payments", on_end).await?;
//!
//!     broker
//!         .publish_event(&AuctionEnded {
//!             auction_id: uuid::Uuid::new_v4(),
//!             winning_bidder_id: uuid::Uuid::new_v4(),
//!             winning_price: 99.99,
//!         })
//!         .await?;
//!
//!     broker.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//!  publish ──► DurableBroker ──append──► LogStore (events:<type>)
//!                   │                        │
//!              subscribe                read_group / ack
//!                   │                        │
//!                   ▼                        ▼
//!          SubscriptionRegistry ◄── ConsumptionLoop per (type, group)
//!                                            │
//!                                   EventRegistry::reconstruct
//!                                            │
//!                                       dispatch ──► handlers
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod subscriptions;
pub mod wire;
mod worker;

// Re-export key types for convenience
pub use broker::{DurableBroker, EventBroker, HistoryEntry, InMemoryBroker, ReplayReport};
pub use config::BrokerConfig;
pub use error::{BrokerError, CodecError, ConfigError};
pub use events::{
    AuctionEnded, BidderRegistered, Event, EventRegistry, PaymentProcessed, ReconstructionRule,
    RecordId, StreamInfo, TypedEvent,
};
pub use handler::{
    DispatchReport, EventHandler, HandlerError, HandlerFailure, HandlerResult, dispatch,
    handler_fn,
};
pub use subscriptions::{Subscription, SubscriptionRegistry};
pub use wire::{Payload, PayloadValue};
pub use worker::{WorkerKey, WorkerState};
