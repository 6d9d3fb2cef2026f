//! Append-only log store adapter for courier.
//!
//! This crate defines the contract courier needs from a durable log: per-stream
//! ordered records with store-assigned ids, consumer groups with
//! acknowledgment, and historical range reads that bypass group state.
//!
//! # Key Types
//!
//! - [`LogStore`] - Trait for appending, group reads, acknowledgment and ranges
//! - [`RecordId`] - Store-assigned, strictly increasing record identifier
//! - [`MemoryLogStore`] - In-process implementation with full group semantics
//! - `IggyLogStore` - Iggy-backed implementation (feature `iggy`)

pub mod config;
pub mod error;
pub mod id;
#[cfg(feature = "iggy")]
pub mod iggy_log;
pub mod memory;
pub mod traits;

// Re-exports
pub use config::IggyStoreConfig;
pub use error::{Error, Result};
pub use id::RecordId;
#[cfg(feature = "iggy")]
pub use iggy_log::IggyLogStore;
pub use memory::MemoryLogStore;
pub use traits::{Fields, LogStore, StreamEntry, StreamInfo};
