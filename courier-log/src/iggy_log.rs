//! Iggy-backed LogStore implementation.
//!
//! Each courier stream maps to a single-partition topic inside one Iggy
//! stream (the configured namespace). Records are stored as JSON envelopes
//! carrying the record id and fields, so ids survive restarts and stay
//! strictly increasing alongside Iggy offsets.
//!
//! # Consumer groups
//!
//! A group's durable cursor is the Iggy consumer offset stored under the
//! group's name. Delivery bookkeeping (which records are pending for which
//! consumer) is kept per process; the stored offset only advances past a
//! contiguous run of acknowledged records, so anything unacknowledged when a
//! process stops is delivered again after restart.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use iggy::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::IggyStoreConfig;
use crate::error::{Error, Result};
use crate::id::RecordId;
use crate::traits::{Fields, LogStore, StreamEntry, StreamInfo};

/// Every courier topic has exactly one partition so offsets give total order.
const PARTITION_ID: u32 = 0;

/// Page size used when scanning a topic.
const SCAN_PAGE: u32 = 256;

/// Consumer name used for historical reads; never committed.
const READER_NAME: &str = "courier-reader";

/// Check if an Iggy error indicates a resource already exists.
fn is_already_exists_error(e: &IggyError) -> bool {
    let err_str = e.to_string();
    err_str.contains("already exists")
        || err_str.contains("already_exists")
        || err_str.contains("AlreadyExists")
}

/// Iggy topic name for a courier stream (`events:Foo` -> `events.Foo`).
fn topic_name(stream: &str) -> String {
    stream.replace(':', ".")
}

fn named(name: &str) -> Result<Identifier> {
    Identifier::named(name).map_err(|e| Error::Iggy(format!("Invalid name '{}': {}", name, e)))
}

/// Stored message body.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: RecordId,
    fields: Fields,
}

#[derive(Debug)]
struct Pending {
    offset: u64,
    consumer: String,
    entry: StreamEntry,
}

/// In-process view of one group on one topic.
#[derive(Debug)]
struct GroupCursor {
    /// Next offset to hand out.
    next_offset: u64,
    /// Highest offset handed out so far, if any.
    delivered: Option<u64>,
    pending: BTreeMap<RecordId, Pending>,
}

/// Iggy-backed implementation of LogStore.
pub struct IggyLogStore {
    config: IggyStoreConfig,
    client: IggyClient,
    /// Last record id per topic; presence means the topic exists.
    topics: Mutex<HashMap<String, RecordId>>,
    cursors: Mutex<HashMap<(String, String), GroupCursor>>,
    connected: RwLock<bool>,
}

impl IggyLogStore {
    /// Create a store for the configured server. Call `connect()` before use.
    pub fn new(config: IggyStoreConfig) -> Result<Self> {
        let client = IggyClient::builder()
            .with_tcp()
            .with_server_address(config.address.clone())
            .build()
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        Ok(Self {
            config,
            client,
            topics: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            connected: RwLock::new(false),
        })
    }

    /// Connect, authenticate, and create the namespace stream if needed.
    pub async fn connect(&self) -> Result<()> {
        self.client.connect().await?;
        info!("Connected to Iggy server at {}", self.config.address);

        self.client
            .login_user(&self.config.username, &self.config.password)
            .await?;
        debug!(user = %self.config.username, "Logged in to Iggy");

        let streams = self.client.get_streams().await?;
        if streams.iter().any(|s| s.name == self.config.namespace) {
            debug!("Stream '{}' already exists", self.config.namespace);
        } else {
            match self.client.create_stream(&self.config.namespace).await {
                Ok(_) => info!("Created stream '{}'", self.config.namespace),
                Err(e) if is_already_exists_error(&e) => {
                    debug!("Stream already exists (concurrent creation)");
                }
                Err(e) => return Err(e.into()),
            }
        }

        *self.connected.write().await = true;
        info!("IggyLogStore connected and ready");
        Ok(())
    }

    /// Check if connected to Iggy.
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    async fn check(&self) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(Error::Unavailable("not connected to iggy".to_string()))
        }
    }

    fn namespace_id(&self) -> Result<Identifier> {
        named(&self.config.namespace)
    }

    /// Number of messages in a topic, or `None` if it does not exist.
    async fn message_count(&self, topic: &str) -> Result<Option<u64>> {
        let details = self
            .client
            .get_topic(&self.namespace_id()?, &named(topic)?)
            .await?;
        Ok(details.map(|t| t.messages_count))
    }

    /// Create the topic if needed and return its last record id.
    async fn ensure_topic(&self, topic: &str) -> Result<RecordId> {
        if let Some(last) = self.topics.lock().await.get(topic) {
            return Ok(*last);
        }

        match self
            .client
            .create_topic(
                &self.namespace_id()?,
                topic,
                1,
                CompressionAlgorithm::None,
                None, // replication_factor
                IggyExpiry::NeverExpire,
                MaxTopicSize::ServerDefault,
            )
            .await
        {
            Ok(_) => info!(topic, "Created topic"),
            Err(e) if is_already_exists_error(&e) => debug!(topic, "Topic already exists"),
            Err(e) => return Err(e.into()),
        }

        let last = match self.message_count(topic).await? {
            Some(count) if count > 0 => self
                .poll_at(topic, READER_NAME, count - 1, 1)
                .await?
                .last()
                .map_or(RecordId::MIN, |(_, entry)| entry.id),
            _ => RecordId::MIN,
        };

        Ok(*self.topics.lock().await.entry(topic.to_string()).or_insert(last))
    }

    /// Read up to `count` messages starting at `offset` without committing.
    async fn poll_at(
        &self,
        topic: &str,
        consumer: &str,
        offset: u64,
        count: u32,
    ) -> Result<Vec<(u64, StreamEntry)>> {
        let consumer = Consumer::new(named(consumer)?);
        let polled = self
            .client
            .poll_messages(
                &self.namespace_id()?,
                &named(topic)?,
                Some(PARTITION_ID),
                &consumer,
                &PollingStrategy::offset(offset),
                count,
                false, // auto_commit = false (manual commit)
            )
            .await?;

        polled
            .messages
            .into_iter()
            .map(|msg| {
                let envelope: Envelope = serde_json::from_slice(&msg.payload)?;
                Ok((msg.header.offset, StreamEntry::new(envelope.id, envelope.fields)))
            })
            .collect()
    }

    /// Load (or create) the in-process cursor for a group.
    async fn cursor_start(&self, topic: &str, group: &str) -> Result<u64> {
        let stored = self
            .client
            .get_consumer_offset(
                &Consumer::new(named(group)?),
                &self.namespace_id()?,
                &named(topic)?,
                Some(PARTITION_ID),
            )
            .await?;
        Ok(stored.map_or(0, |o| o.stored_offset + 1))
    }

    async fn deliver_new(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let key = (topic.to_string(), group.to_string());
        let next_offset = match self.cursors.lock().await.get(&key) {
            Some(cursor) => cursor.next_offset,
            None => {
                return Err(Error::NoGroup {
                    stream: topic.to_string(),
                    group: group.to_string(),
                });
            }
        };

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let polled = self.poll_at(topic, READER_NAME, next_offset, count).await?;

        let mut cursors = self.cursors.lock().await;
        let Some(cursor) = cursors.get_mut(&key) else {
            return Ok(Vec::new());
        };
        let mut batch = Vec::with_capacity(polled.len());
        for (offset, entry) in polled {
            // A concurrent reader in this process may have taken it already.
            if offset < cursor.next_offset {
                continue;
            }
            cursor.next_offset = offset + 1;
            cursor.delivered = Some(offset);
            cursor.pending.insert(
                entry.id,
                Pending {
                    offset,
                    consumer: consumer.to_string(),
                    entry: entry.clone(),
                },
            );
            batch.push(entry);
        }
        Ok(batch)
    }
}

#[async_trait]
impl LogStore for IggyLogStore {
    async fn ping(&self) -> Result<()> {
        self.check().await?;
        self.client.ping().await?;
        Ok(())
    }

    async fn append(&self, stream: &str, fields: Fields, id: Option<RecordId>) -> Result<RecordId> {
        self.check().await?;
        let topic = topic_name(stream);
        self.ensure_topic(&topic).await?;

        // Hold the topic map for the whole append so ids are assigned in order.
        let mut topics = self.topics.lock().await;
        let last = topics.get(&topic).copied().unwrap_or(RecordId::MIN);
        let id = match id {
            Some(requested) if requested.can_follow(last) => requested,
            Some(requested) => {
                return Err(Error::DuplicateOrOutOfOrderId {
                    stream: stream.to_string(),
                    requested,
                    last,
                });
            }
            None => {
                let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
                RecordId::next_after(last, now)
            }
        };

        let payload = serde_json::to_vec(&Envelope { id, fields })?;
        let message = IggyMessage::builder()
            .payload(payload.into())
            .build()
            .map_err(|e| Error::Iggy(e.to_string()))?;
        let partitioning = Partitioning::partition_id(PARTITION_ID);

        let mut messages = [message];
        self.client
            .send_messages(&self.namespace_id()?, &named(&topic)?, &partitioning, &mut messages)
            .await?;

        topics.insert(topic, id);
        trace!(stream, %id, "Appended record to Iggy");
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        self.check().await?;
        let topic = topic_name(stream);
        self.ensure_topic(&topic).await?;

        match self
            .client
            .create_consumer_group(&self.namespace_id()?, &named(&topic)?, group, None)
            .await
        {
            Ok(_) => info!(stream, group, "Created consumer group"),
            Err(e) if is_already_exists_error(&e) => debug!(stream, group, "Consumer group exists"),
            Err(e) => return Err(e.into()),
        }

        let key = (topic.clone(), group.to_string());
        if !self.cursors.lock().await.contains_key(&key) {
            let next_offset = self.cursor_start(&topic, group).await?;
            self.cursors.lock().await.entry(key).or_insert(GroupCursor {
                next_offset,
                delivered: None,
                pending: BTreeMap::new(),
            });
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
        let topic = topic_name(stream);
        let deadline = Instant::now() + block;

        loop {
            self.check().await?;
            let batch = self.deliver_new(&topic, group, consumer, count).await?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep_until((Instant::now() + self.config.poll_interval).min(deadline))
                .await;
        }
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.check().await?;
        let key = (topic_name(stream), group.to_string());
        let cursors = self.cursors.lock().await;
        Ok(cursors.get(&key).map_or_else(Vec::new, |cursor| {
            cursor
                .pending
                .values()
                .filter(|p| p.consumer == consumer)
                .take(count)
                .map(|p| p.entry.clone())
                .collect()
        }))
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: RecordId) -> Result<bool> {
        self.check().await?;
        let topic = topic_name(stream);
        let key = (topic.clone(), group.to_string());

        let commit = {
            let mut cursors = self.cursors.lock().await;
            let Some(cursor) = cursors.get_mut(&key) else {
                return Ok(false);
            };
            if cursor.pending.remove(&id).is_none() {
                return Ok(false);
            }
            // Everything below the oldest pending offset is done.
            match cursor.pending.values().map(|p| p.offset).min() {
                Some(0) => None,
                Some(oldest) => Some(oldest - 1),
                None => cursor.delivered,
            }
        };

        if let Some(offset) = commit {
            self.client
                .store_consumer_offset(
                    &Consumer::new(named(group)?),
                    &self.namespace_id()?,
                    &named(&topic)?,
                    Some(PARTITION_ID),
                    offset,
                )
                .await?;
            trace!(stream, group, offset, "Committed group offset");
        }
        Ok(true)
    }

    async fn range(
        &self,
        stream: &str,
        from: RecordId,
        to: RecordId,
        count: Option<usize>,
    ) -> Result<Vec<StreamEntry>> {
        self.check().await?;
        let topic = topic_name(stream);
        let limit = count.unwrap_or(usize::MAX);
        if from > to || limit == 0 || self.message_count(&topic).await?.is_none() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.poll_at(&topic, READER_NAME, offset, SCAN_PAGE).await?;
            let Some((last_offset, _)) = page.last() else {
                return Ok(out);
            };
            offset = last_offset + 1;

            for (_, entry) in page {
                if entry.id > to {
                    return Ok(out);
                }
                if entry.id >= from {
                    out.push(entry);
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
        }
    }

    async fn reverse_range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        self.check().await?;
        let topic = topic_name(stream);
        let Some(total) = self.message_count(&topic).await? else {
            return Ok(Vec::new());
        };
        let wanted = u64::try_from(count).unwrap_or(u64::MAX).min(total);
        if wanted == 0 {
            return Ok(Vec::new());
        }

        let start = total - wanted;
        let wanted = u32::try_from(wanted).unwrap_or(u32::MAX);
        let mut entries: Vec<StreamEntry> = self
            .poll_at(&topic, READER_NAME, start, wanted)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamInfo> {
        self.check().await?;
        let topic = topic_name(stream);
        let Some(length) = self.message_count(&topic).await? else {
            return Ok(StreamInfo::default());
        };

        let group_count = self
            .client
            .get_consumer_groups(&self.namespace_id()?, &named(&topic)?)
            .await?
            .len();
        let (first_id, last_id) = if length == 0 {
            (None, None)
        } else {
            let first = self.poll_at(&topic, READER_NAME, 0, 1).await?;
            let last = self.poll_at(&topic, READER_NAME, length - 1, 1).await?;
            (
                first.first().map(|(_, e)| e.id),
                last.last().map(|(_, e)| e.id),
            )
        };

        Ok(StreamInfo {
            length,
            first_id,
            last_id,
            group_count,
        })
    }

    async fn close(&self) -> Result<()> {
        let mut connected = self.connected.write().await;
        if *connected {
            *connected = false;
            if let Err(e) = self.client.disconnect().await {
                debug!(error = %e, "Error while disconnecting from Iggy");
            }
            info!("IggyLogStore closed");
        }
        Ok(())
    }
}
