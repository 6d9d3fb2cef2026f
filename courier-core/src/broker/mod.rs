//! Broker implementations
//!
//! Both brokers implement [`EventBroker`], so services can be wired to
//! either one without knowing which backend they run on.

mod durable;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use durable::{DurableBroker, HistoryEntry, ReplayReport};
pub use memory::InMemoryBroker;

use crate::error::BrokerError;
use crate::events::{RecordId, TypedEvent};
use crate::handler::EventHandler;
use crate::wire::Payload;

/// Type-based publish/subscribe
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Register a handler for an event type under the default group.
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError>;

    /// Publish a payload. Durable backends return the assigned record id.
    async fn publish(
        &self,
        event_type: &str,
        payload: Payload,
    ) -> Result<Option<RecordId>, BrokerError>;

    /// Stop delivering and release resources. Safe to call more than once.
    async fn close(&self) -> Result<(), BrokerError>;
}

impl dyn EventBroker {
    /// Publish a typed event under its own type name.
    pub async fn publish_event<E: TypedEvent>(
        &self,
        event: &E,
    ) -> Result<Option<RecordId>, BrokerError> {
        self.publish(E::EVENT_TYPE, event.to_payload()).await
    }
}
