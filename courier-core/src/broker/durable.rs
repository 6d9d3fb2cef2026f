//! Durable broker over a log store
//!
//! Each event type is a stream named `<prefix>:<type>`. Subscriptions join a
//! consumer group on that stream and a background consumption loop per
//! `(type, group)` delivers every record at least once. Replay and history are
//! side reads that never touch group cursors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::EventBroker;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::events::{EventRegistry, RecordId, StreamInfo, TypedEvent};
use crate::handler::{EventHandler, HandlerFailure, dispatch};
use crate::subscriptions::SubscriptionRegistry;
use crate::wire::{self, EVENT_TYPE_FIELD, Payload};
use crate::worker::{LoopContext, WorkerKey, WorkerPool, WorkerState};
use courier_log::LogStore;

/// One record as returned by [`DurableBroker::get_history`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Payload,
}

/// Outcome of [`DurableBroker::replay`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records dispatched
    pub replayed: usize,
    /// Handler failures across all replayed records
    pub failures: Vec<HandlerFailure>,
}

/// Broker backed by a [`LogStore`]
pub struct DurableBroker {
    store: Arc<dyn LogStore>,
    registry: Arc<EventRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    config: Arc<BrokerConfig>,
    workers: WorkerPool,
    closed: AtomicBool,
}

impl DurableBroker {
    /// Connect to `store`, failing if it cannot be reached.
    pub async fn open(
        store: Arc<dyn LogStore>,
        registry: Arc<EventRegistry>,
        mut config: BrokerConfig,
    ) -> Result<Self, BrokerError> {
        store.ping().await?;
        if config.read_count == 0 {
            warn!("read_count of 0 would never fetch a record; using 1");
            config.read_count = 1;
        }
        info!(
            prefix = %config.stream_prefix,
            consumer = %config.resolved_consumer_name(),
            "Durable broker opened"
        );

        Ok(Self {
            store,
            registry,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            config: Arc::new(config),
            workers: WorkerPool::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn stream(&self, event_type: &str) -> String {
        self.config.stream_name(event_type)
    }

    /// Register `handler` under `group` and make sure its loop is running.
    ///
    /// The loop starts in the background; it may not have polled yet when
    /// this returns.
    pub async fn subscribe_in_group(
        &self,
        event_type: &str,
        group: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;

        // A failed subscribe must leave nothing registered.
        self.store.ensure_group(&self.stream(event_type), group).await?;
        self.subscriptions.register(event_type, group, handler).await;

        let ctx = LoopContext {
            store: Arc::clone(&self.store),
            subscriptions: Arc::clone(&self.subscriptions),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        };
        if self
            .workers
            .ensure_running(WorkerKey::new(event_type, group), ctx)
            .await
        {
            info!(event_type, group, "Subscribed");
        }
        Ok(())
    }

    /// Append a record. With `id`, that exact id is requested and must be
    /// greater than the stream's last id.
    pub async fn publish(
        &self,
        event_type: &str,
        payload: &Payload,
        id: Option<RecordId>,
    ) -> Result<RecordId, BrokerError> {
        self.ensure_open()?;

        let fields = wire::encode(event_type, payload)?;
        let id = self.store.append(&self.stream(event_type), fields, id).await?;
        debug!(event_type, record_id = %id, "Published");
        Ok(id)
    }

    /// Publish a typed event under its own type name.
    pub async fn publish_event<E: TypedEvent>(&self, event: &E) -> Result<RecordId, BrokerError> {
        self.publish(E::EVENT_TYPE, &event.to_payload(), None).await
    }

    /// Re-deliver stored records, oldest first, starting at `from` inclusive.
    ///
    /// Every handler for the type runs, whatever its group. Nothing is
    /// acknowledged and group cursors are untouched, so handlers may see
    /// records their group already consumed.
    pub async fn replay(
        &self,
        event_type: &str,
        from: RecordId,
        count: Option<usize>,
    ) -> Result<ReplayReport, BrokerError> {
        let handlers = self.subscriptions.all_handlers(event_type).await;
        self.replay_to(event_type, from, count, &handlers).await
    }

    /// Like [`replay`](Self::replay), but delivers only to `handlers`.
    pub async fn replay_to(
        &self,
        event_type: &str,
        from: RecordId,
        count: Option<usize>,
        handlers: &[Arc<dyn EventHandler>],
    ) -> Result<ReplayReport, BrokerError> {
        self.ensure_open()?;

        let entries = self
            .store
            .range(&self.stream(event_type), from, RecordId::MAX, count)
            .await?;

        let mut report = ReplayReport::default();
        for entry in entries {
            let payload = match wire::decode(&entry.fields) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(event_type, record_id = %entry.id, error = %e, "Skipping undecodable record");
                    continue;
                }
            };
            let event = self.registry.reconstruct(payload);
            let dispatched = dispatch(handlers, &event).await;
            report.replayed += 1;
            report.failures.extend(dispatched.failures);
        }

        info!(event_type, from = %from, replayed = report.replayed, "Replay finished");
        Ok(report)
    }

    /// The most recent `count` records, newest first. No handler runs.
    pub async fn get_history(
        &self,
        event_type: &str,
        count: usize,
    ) -> Result<Vec<HistoryEntry>, BrokerError> {
        self.ensure_open()?;

        let entries = self
            .store
            .reverse_range(&self.stream(event_type), count)
            .await?;

        let mut history = Vec::with_capacity(entries.len());
        for entry in entries {
            match wire::decode(&entry.fields) {
                Ok(data) => history.push(HistoryEntry {
                    id: entry.id,
                    event_type: entry
                        .fields
                        .get(EVENT_TYPE_FIELD)
                        .cloned()
                        .unwrap_or_else(|| event_type.to_string()),
                    data,
                }),
                Err(e) => {
                    warn!(event_type, record_id = %entry.id, error = %e, "Skipping undecodable record");
                }
            }
        }
        Ok(history)
    }

    /// Metadata for the type's stream; zeroed if nothing was published.
    pub async fn get_stream_info(&self, event_type: &str) -> Result<StreamInfo, BrokerError> {
        self.ensure_open()?;
        Ok(self.store.stream_info(&self.stream(event_type)).await?)
    }

    /// Current state of the loop for `(event_type, group)`, if one was started.
    pub async fn worker_state(&self, event_type: &str, group: &str) -> Option<WorkerState> {
        self.workers
            .state(&WorkerKey::new(event_type, group))
            .await
    }

    /// Keys of every loop started so far.
    pub async fn workers(&self) -> Vec<WorkerKey> {
        self.workers.keys().await
    }

    /// Stop all loops and close the store.
    ///
    /// Waits up to `shutdown_timeout` for loops to notice; any still running
    /// are left behind. Later calls are no-ops.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let abandoned = self.workers.shutdown(self.config.shutdown_timeout).await;
        if abandoned > 0 {
            warn!(abandoned, "Some consumers did not stop before the shutdown timeout");
        }

        self.store.close().await?;
        info!("Durable broker closed");
        Ok(())
    }
}

#[async_trait]
impl EventBroker for DurableBroker {
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError> {
        let group = self.config.default_group.clone();
        self.subscribe_in_group(event_type, &group, handler).await
    }

    async fn publish(
        &self,
        event_type: &str,
        payload: Payload,
    ) -> Result<Option<RecordId>, BrokerError> {
        DurableBroker::publish(self, event_type, &payload, None)
            .await
            .map(Some)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        DurableBroker::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerResult, handler_fn};
    use courier_log::MemoryLogStore;
    use std::time::Duration;

    async fn broker_with(store: Arc<MemoryLogStore>) -> DurableBroker {
        let config = BrokerConfig::default()
            .with_block_timeout(Duration::from_millis(20))
            .with_error_backoff(Duration::from_millis(20));
        DurableBroker::open(store, Arc::new(EventRegistry::with_auction_events()), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_fails_when_store_is_down() {
        let store = Arc::new(MemoryLogStore::new());
        store.set_available(false);

        let result = DurableBroker::open(
            store,
            Arc::new(EventRegistry::new()),
            BrokerConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(BrokerError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn publish_uses_prefixed_stream() {
        let store = Arc::new(MemoryLogStore::new());
        let broker = broker_with(Arc::clone(&store)).await;

        broker
            .publish("Ping", &Payload::new().with("n", 1_i64), None)
            .await
            .unwrap();

        assert_eq!(store.stream_info("events:Ping").await.unwrap().length, 1);
    }

    #[tokio::test]
    async fn explicit_id_must_increase() {
        let broker = broker_with(Arc::new(MemoryLogStore::new())).await;
        let payload = Payload::new();

        let id = broker
            .publish("T", &payload, Some(RecordId::new(5, 0)))
            .await
            .unwrap();
        assert_eq!(id, RecordId::new(5, 0));

        let err = broker
            .publish("T", &payload, Some(RecordId::new(5, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::DuplicateOrOutOfOrderId { .. }));
    }

    #[tokio::test]
    async fn publish_fails_fast_when_store_is_down() {
        let store = Arc::new(MemoryLogStore::new());
        let broker = broker_with(Arc::clone(&store)).await;
        store.set_available(false);

        let err = broker.publish("T", &Payload::new(), None).await.unwrap_err();
        assert!(matches!(err, BrokerError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn history_carries_type_tag() {
        let broker = broker_with(Arc::new(MemoryLogStore::new())).await;
        let id = broker
            .publish("T", &Payload::new().with("k", "v"), None)
            .await
            .unwrap();

        let history = broker.get_history("T", 5).await.unwrap();
        assert_eq!(
            history,
            vec![HistoryEntry {
                id,
                event_type: "T".to_string(),
                data: Payload::new().with("k", "v"),
            }]
        );
    }

    #[test]
    fn history_entry_serializes_type_field() {
        let entry = HistoryEntry {
            id: RecordId::new(7, 0),
            event_type: "T".to_string(),
            data: Payload::new().with("k", "v"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "T");
        assert_eq!(json["id"], "7-0");
        assert!(json.get("event_type").is_none());
    }

    #[tokio::test]
    async fn zero_read_count_is_raised_on_open() {
        let mut config = BrokerConfig::default();
        config.read_count = 0;
        let broker = DurableBroker::open(
            Arc::new(MemoryLogStore::new()),
            Arc::new(EventRegistry::new()),
            config,
        )
        .await
        .unwrap();
        assert_eq!(broker.config().read_count, 1);
    }

    #[tokio::test]
    async fn stream_info_for_unknown_type_is_zeroed() {
        let broker = broker_with(Arc::new(MemoryLogStore::new())).await;
        assert_eq!(
            broker.get_stream_info("Nothing").await.unwrap(),
            StreamInfo::default()
        );
    }

    #[tokio::test]
    async fn subscribe_starts_one_worker_per_pair() {
        let broker = broker_with(Arc::new(MemoryLogStore::new())).await;
        let noop = handler_fn("noop", |_| async { HandlerResult::Ok(()) });

        broker.subscribe_in_group("T", "g1", Arc::clone(&noop)).await.unwrap();
        broker.subscribe_in_group("T", "g1", Arc::clone(&noop)).await.unwrap();
        broker.subscribe_in_group("T", "g2", Arc::clone(&noop)).await.unwrap();
        EventBroker::subscribe(&broker, "T", noop).await.unwrap();

        let mut keys = broker.workers().await;
        keys.sort_by(|a, b| a.group.cmp(&b.group));
        let groups: Vec<&str> = keys.iter().map(|k| k.group.as_str()).collect();
        assert_eq!(groups, vec!["default", "g1", "g2"]);

        broker.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let broker = broker_with(Arc::new(MemoryLogStore::new())).await;
        let noop = handler_fn("noop", |_| async { HandlerResult::Ok(()) });
        broker.subscribe_in_group("T", "g", Arc::clone(&noop)).await.unwrap();

        broker.close().await.unwrap();
        broker.close().await.unwrap();

        assert!(broker.is_closed());
        assert_eq!(broker.worker_state("T", "g").await, Some(WorkerState::Stopped));
        assert!(matches!(
            broker.publish("T", &Payload::new(), None).await,
            Err(BrokerError::Closed)
        ));
        assert!(matches!(
            broker.subscribe_in_group("T", "g", noop).await,
            Err(BrokerError::Closed)
        ));
        assert!(matches!(broker.get_history("T", 1).await, Err(BrokerError::Closed)));
    }
}
