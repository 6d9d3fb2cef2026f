//! In-process broker with no persistence

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::EventBroker;
use crate::error::BrokerError;
use crate::events::{EventRegistry, RecordId};
use crate::handler::{DispatchReport, EventHandler, dispatch};
use crate::subscriptions::SubscriptionRegistry;
use crate::wire::Payload;

const GROUP: &str = "default";

/// Ephemeral broker: publish runs every handler on the caller's task
///
/// No history, no replay, no consumer groups. Everything is lost when the
/// broker is dropped.
pub struct InMemoryBroker {
    registry: Arc<EventRegistry>,
    subscriptions: SubscriptionRegistry,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            registry,
            subscriptions: SubscriptionRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Dispatch to every handler for `event_type`, in registration order.
    pub async fn publish_and_report(
        &self,
        event_type: &str,
        payload: Payload,
    ) -> Result<DispatchReport, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let handlers = self.subscriptions.all_handlers(event_type).await;
        let event = self.registry.reconstruct(payload);
        let report = dispatch(&handlers, &event).await;
        debug!(
            event_type,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Published in-memory event"
        );
        Ok(report)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(Arc::new(EventRegistry::with_auction_events()))
    }
}

#[async_trait]
impl EventBroker for InMemoryBroker {
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.subscriptions.register(event_type, GROUP, handler).await;
        Ok(())
    }

    async fn publish(
        &self,
        event_type: &str,
        payload: Payload,
    ) -> Result<Option<RecordId>, BrokerError> {
        self.publish_and_report(event_type, payload).await?;
        Ok(None)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
