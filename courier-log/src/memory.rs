//! In-memory LogStore implementation.
//!
//! Keeps every stream, consumer group and pending list in process memory with
//! the same semantics as a durable store. Useful for tests, for the in-process
//! demo, and anywhere persistence across restarts is not needed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::id::RecordId;
use crate::traits::{Fields, LogStore, StreamEntry, StreamInfo};

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<RecordId, Fields>,
    last_id: RecordId,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest id handed out to any consumer of the group.
    last_delivered: RecordId,
    /// Delivered but unacknowledged records.
    pending: BTreeMap<RecordId, PendingEntry>,
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    deliveries: u32,
}

/// In-memory implementation of LogStore.
pub struct MemoryLogStore {
    streams: RwLock<HashMap<String, StreamState>>,
    /// Wakes blocked `read_group` calls after an append.
    appended: Notify,
    available: AtomicBool,
    closed: AtomicBool,
}

impl MemoryLogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            appended: Notify::new(),
            available: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate losing or regaining the connection.
    ///
    /// While unavailable every operation fails with [`Error::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        debug!(available, "MemoryLogStore availability changed");
        if available {
            self.appended.notify_waiters();
        }
    }

    /// Number of unacknowledged records for a group.
    pub async fn pending_len(&self, stream: &str, group: &str) -> usize {
        self.streams
            .read()
            .await
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    /// How many times a pending record has been handed out.
    pub async fn delivery_count(&self, stream: &str, group: &str, id: RecordId) -> Option<u32> {
        self.streams
            .read()
            .await
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&id))
            .map(|p| p.deliveries)
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("connection closed".to_string()));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    /// Hand out up to `count` never-delivered records to `consumer`.
    async fn deliver_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let no_group = || Error::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };

        let mut streams = self.streams.write().await;
        let state = streams.get_mut(stream).ok_or_else(no_group)?;
        let group_state = state.groups.get_mut(group).ok_or_else(no_group)?;

        let batch: Vec<StreamEntry> = state
            .entries
            .range(group_state.last_delivered..)
            .filter(|(id, _)| **id > group_state.last_delivered)
            .take(count)
            .map(|(id, fields)| StreamEntry::new(*id, fields.clone()))
            .collect();

        for entry in &batch {
            group_state.pending.insert(
                entry.id,
                PendingEntry {
                    consumer: consumer.to_string(),
                    deliveries: 1,
                },
            );
        }
        if let Some(last) = batch.last() {
            group_state.last_delivered = last.id;
        }

        Ok(batch)
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn append(&self, stream: &str, fields: Fields, id: Option<RecordId>) -> Result<RecordId> {
        self.check()?;

        let id = {
            let mut streams = self.streams.write().await;
            let state = streams.entry(stream.to_string()).or_default();

            let id = match id {
                Some(requested) if requested.can_follow(state.last_id) => requested,
                Some(requested) => {
                    return Err(Error::DuplicateOrOutOfOrderId {
                        stream: stream.to_string(),
                        requested,
                        last: state.last_id,
                    });
                }
                None => RecordId::next_after(state.last_id, now_millis()),
            };

            state.entries.insert(id, fields);
            state.last_id = id;
            id
        };

        trace!(stream, %id, "Appended record");
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        self.check()?;

        let mut streams = self.streams.write().await;
        let state = streams.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            debug!(stream, group, "Consumer group already exists");
        } else {
            state.groups.insert(group.to_string(), GroupState::default());
            debug!(stream, group, "Created consumer group");
        }
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;

        loop {
            // Register interest before checking so an append between the
            // check and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check()?;
            let batch = self.deliver_new(stream, group, consumer, count).await?;
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.check()?;

        let mut streams = self.streams.write().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Err(Error::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        };

        let mut batch = Vec::new();
        for (id, pending) in group_state
            .pending
            .iter_mut()
            .filter(|(_, p)| p.consumer == consumer)
            .take(count)
        {
            // Trimmed records stay pending but have no body to hand out.
            if let Some(fields) = state.entries.get(id) {
                pending.deliveries += 1;
                batch.push(StreamEntry::new(*id, fields.clone()));
            }
        }
        Ok(batch)
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: RecordId) -> Result<bool> {
        self.check()?;

        let mut streams = self.streams.write().await;
        let acked = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .is_some_and(|g| g.pending.remove(&id).is_some());
        trace!(stream, group, %id, acked, "Acknowledged record");
        Ok(acked)
    }

    async fn range(
        &self,
        stream: &str,
        from: RecordId,
        to: RecordId,
        count: Option<usize>,
    ) -> Result<Vec<StreamEntry>> {
        self.check()?;

        if from > to {
            return Ok(Vec::new());
        }
        let streams = self.streams.read().await;
        let Some(state) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(state
            .entries
            .range(from..=to)
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| StreamEntry::new(*id, fields.clone()))
            .collect())
    }

    async fn reverse_range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        self.check()?;

        let streams = self.streams.read().await;
        let Some(state) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(state
            .entries
            .iter()
            .rev()
            .take(count)
            .map(|(id, fields)| StreamEntry::new(*id, fields.clone()))
            .collect())
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamInfo> {
        self.check()?;

        let streams = self.streams.read().await;
        let Some(state) = streams.get(stream) else {
            return Ok(StreamInfo::default());
        };
        Ok(StreamInfo {
            length: state.entries.len() as u64,
            first_id: state.entries.keys().next().copied(),
            last_id: state.entries.keys().next_back().copied(),
            group_count: state.groups.len(),
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("MemoryLogStore closed");
            self.appended.notify_waiters();
        }
        Ok(())
    }
}
