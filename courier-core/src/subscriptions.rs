//! Subscription registry
//!
//! Per event type, an ordered list of `(group, handler)` pairs. Registration
//! order is invocation order. Registering the same handler twice means it runs
//! twice per record.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::handler::EventHandler;

/// One registered handler
#[derive(Clone)]
pub struct Subscription {
    pub group: String,
    pub handler: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("group", &self.group)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Thread-safe map from event type to subscriptions
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_type: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `(event_type, group)`.
    pub async fn register(&self, event_type: &str, group: &str, handler: Arc<dyn EventHandler>) {
        self.by_type
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription {
                group: group.to_string(),
                handler,
            });
    }

    /// Handlers for one group, in registration order.
    pub async fn handlers_for(&self, event_type: &str, group: &str) -> Vec<Arc<dyn EventHandler>> {
        self.by_type
            .read()
            .await
            .get(event_type)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.group == group)
                    .map(|s| Arc::clone(&s.handler))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handlers for every group, in registration order.
    pub async fn all_handlers(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.by_type
            .read()
            .await
            .get(event_type)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the subscriptions for an event type.
    pub async fn subscriptions(&self, event_type: &str) -> Vec<Subscription> {
        self.by_type
            .read()
            .await
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Event types with at least one subscription.
    pub async fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_type.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}
