//! Event system for courier

pub mod registry;
pub mod types;

// Re-export key types for convenience
pub use registry::{EventRegistry, ReconstructionRule};
pub use types::{AuctionEnded, BidderRegistered, Event, PaymentProcessed, TypedEvent};

// Re-export log types from courier-log
pub use courier_log::{RecordId, StreamInfo};
