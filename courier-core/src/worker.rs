//! Consumption loops
//!
//! One background task per `(event type, group)` pair polls the log store for
//! records new to its group, dispatches each to the group's handlers, and
//! acknowledges it whatever the handlers did. Store errors put the loop into
//! backoff; it never exits on its own. Shutdown is cooperative: the shared
//! cancellation token is checked at every poll boundary.
//!
//! ```text
//! Starting -> Polling -> Dispatching -> Acknowledging -> Polling ...
//!             Polling -> Backoff -> Polling          (store error)
//!             *       -> Stopped                     (cancelled)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_log::{LogStore, RecordId, StreamEntry};
use futures_util::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::events::EventRegistry;
use crate::handler::dispatch;
use crate::subscriptions::SubscriptionRegistry;
use crate::wire;

/// Where a consumption loop is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Polling,
    Dispatching,
    Acknowledging,
    Backoff,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Polling => write!(f, "polling"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Acknowledging => write!(f, "acknowledging"),
            Self::Backoff => write!(f, "backoff"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Identity of a consumption loop
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub event_type: String,
    pub group: String,
}

impl WorkerKey {
    pub fn new(event_type: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.event_type, self.group)
    }
}

/// Everything a loop shares with the broker
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub store: Arc<dyn LogStore>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub registry: Arc<EventRegistry>,
    pub config: Arc<BrokerConfig>,
}

/// A single background consumer for one `(event type, group)` pair
pub(crate) struct ConsumptionLoop {
    key: WorkerKey,
    stream: String,
    consumer: String,
    ctx: LoopContext,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
}

impl ConsumptionLoop {
    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    async fn run(self) {
        info!(
            worker = %self.key,
            stream = %self.stream,
            consumer = %self.consumer,
            "Started consumer"
        );

        // Pending records are re-read at start and after every store error,
        // which also picks up acknowledgements that failed in between.
        let mut recovered = false;
        while !self.cancel.is_cancelled() {
            if !recovered {
                recovered = self.recover_pending().await;
                if !recovered {
                    self.back_off().await;
                    continue;
                }
            }

            self.set_state(WorkerState::Polling);
            let polled = self
                .ctx
                .store
                .read_group(
                    &self.stream,
                    &self.key.group,
                    &self.consumer,
                    self.ctx.config.read_count,
                    self.ctx.config.block_timeout,
                )
                .await;

            match polled {
                Ok(entries) => {
                    for entry in entries {
                        if !self.process(entry).await {
                            recovered = false;
                        }
                    }
                }
                Err(e) => {
                    warn!(worker = %self.key, error = %e, "Error polling stream, backing off");
                    recovered = false;
                    self.back_off().await;
                }
            }
        }

        self.set_state(WorkerState::Stopped);
        info!(worker = %self.key, "Consumer stopped");
    }

    async fn back_off(&self) {
        self.set_state(WorkerState::Backoff);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.ctx.config.error_backoff) => {}
        }
    }

    /// Re-handle records this consumer received but never acknowledged.
    ///
    /// Returns false if the pending list could not be read.
    async fn recover_pending(&self) -> bool {
        let mut after = RecordId::MIN;
        loop {
            let pending = match self
                .ctx
                .store
                .read_pending(
                    &self.stream,
                    &self.key.group,
                    &self.consumer,
                    self.ctx.config.read_count,
                )
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(worker = %self.key, error = %e, "Could not read pending records, backing off");
                    return false;
                }
            };

            // Anything not past `after` failed to acknowledge last round.
            let fresh: Vec<StreamEntry> = pending.into_iter().filter(|e| e.id > after).collect();
            let Some(last) = fresh.last().map(|e| e.id) else {
                return true;
            };
            info!(worker = %self.key, count = fresh.len(), "Redelivering pending records");
            for entry in fresh {
                if self.cancel.is_cancelled() {
                    return true;
                }
                self.process(entry).await;
            }
            after = last;
        }
    }

    /// Dispatch and acknowledge one record. Returns whether the ack landed.
    async fn process(&self, entry: StreamEntry) -> bool {
        self.set_state(WorkerState::Dispatching);
        match wire::decode(&entry.fields) {
            Ok(payload) => {
                let event = self.ctx.registry.reconstruct(payload);
                let handlers = self
                    .ctx
                    .subscriptions
                    .handlers_for(&self.key.event_type, &self.key.group)
                    .await;
                let report = dispatch(&handlers, &event).await;
                debug!(
                    worker = %self.key,
                    record_id = %entry.id,
                    delivered = report.delivered,
                    failed = report.failures.len(),
                    "Dispatched record"
                );
            }
            Err(e) => {
                warn!(
                    worker = %self.key,
                    record_id = %entry.id,
                    error = %e,
                    "Undecodable record, acknowledging without dispatch"
                );
            }
        }

        self.set_state(WorkerState::Acknowledging);
        match self
            .ctx
            .store
            .acknowledge(&self.stream, &self.key.group, entry.id)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    worker = %self.key,
                    record_id = %entry.id,
                    error = %e,
                    "Failed to acknowledge record; it stays pending"
                );
                false
            }
        }
    }
}

struct WorkerHandle {
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<WorkerState>,
}

/// The set of running consumption loops, at most one per key
pub(crate) struct WorkerPool {
    workers: Mutex<HashMap<WorkerKey, WorkerHandle>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a loop for `key` unless one exists. Returns whether it started.
    pub async fn ensure_running(&self, key: WorkerKey, ctx: LoopContext) -> bool {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&key) || self.cancel.is_cancelled() {
            return false;
        }

        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let worker = ConsumptionLoop {
            stream: ctx.config.stream_name(&key.event_type),
            consumer: ctx.config.resolved_consumer_name(),
            key: key.clone(),
            ctx,
            cancel: self.cancel.child_token(),
            state: state_tx,
        };
        let task = tokio::spawn(worker.run());

        workers.insert(
            key,
            WorkerHandle {
                task: Some(task),
                state: state_rx,
            },
        );
        true
    }

    pub async fn state(&self, key: &WorkerKey) -> Option<WorkerState> {
        self.workers
            .lock()
            .await
            .get(key)
            .map(|w| *w.state.borrow())
    }

    pub async fn keys(&self) -> Vec<WorkerKey> {
        self.workers.lock().await.keys().cloned().collect()
    }

    /// Signal every loop to stop and wait up to `timeout` for them.
    ///
    /// Loops still running afterwards are left to finish on their own.
    /// Returns how many were abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.cancel.cancel();

        let tasks: Vec<(WorkerKey, JoinHandle<()>)> = {
            let mut workers = self.workers.lock().await;
            workers
                .iter_mut()
                .filter_map(|(key, w)| w.task.take().map(|t| (key.clone(), t)))
                .collect()
        };

        let results = join_all(tasks.into_iter().map(|(key, task)| async move {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    warn!(worker = %key, error = %e, "Consumer task ended abnormally");
                    false
                }
                Err(_) => {
                    warn!(worker = %key, "Consumer did not stop in time; abandoning it");
                    true
                }
            }
        }))
        .await;

        results.into_iter().filter(|abandoned| *abandoned).count()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
