//! Core traits for log store operations.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::id::RecordId;

/// Flat string-keyed record body, as stored in the log.
pub type Fields = BTreeMap<String, String>;

/// A record read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Store-assigned id.
    pub id: RecordId,
    /// Record body.
    pub fields: Fields,
}

impl StreamEntry {
    #[must_use]
    pub fn new(id: RecordId, fields: Fields) -> Self {
        Self { id, fields }
    }
}

/// Metadata about a stream.
///
/// A stream that does not exist reports the zeroed default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Number of records in the stream.
    pub length: u64,
    /// Id of the oldest record.
    pub first_id: Option<RecordId>,
    /// Id of the newest record.
    pub last_id: Option<RecordId>,
    /// Number of consumer groups registered on the stream.
    pub group_count: usize,
}

/// Durable, per-stream ordered log with consumer groups.
///
/// Streams are created implicitly by `append` and `ensure_group`. Historical
/// reads (`range`, `reverse_range`) never touch consumer-group state.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> crate::Result<()>;

    /// Append a record. With `id` set, that exact id is requested and must be
    /// strictly greater than the stream's last id.
    async fn append(&self, stream: &str, fields: Fields, id: Option<RecordId>)
    -> crate::Result<RecordId>;

    /// Create `group` on `stream` positioned at the beginning, if absent.
    ///
    /// Calling this for an existing group is a no-op and leaves its cursor alone.
    async fn ensure_group(&self, stream: &str, group: &str) -> crate::Result<()>;

    /// Read up to `count` records never delivered to `group`, waiting up to
    /// `block` for at least one. Returns an empty list on timeout.
    ///
    /// Returned records are pending for `consumer` until acknowledged.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> crate::Result<Vec<StreamEntry>>;

    /// Records delivered to `consumer` in `group` but not yet acknowledged.
    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> crate::Result<Vec<StreamEntry>>;

    /// Mark a record consumed for `group`. Returns whether it was pending.
    async fn acknowledge(&self, stream: &str, group: &str, id: RecordId) -> crate::Result<bool>;

    /// Records with `from <= id <= to`, oldest first.
    async fn range(
        &self,
        stream: &str,
        from: RecordId,
        to: RecordId,
        count: Option<usize>,
    ) -> crate::Result<Vec<StreamEntry>>;

    /// The newest `count` records, newest first.
    async fn reverse_range(&self, stream: &str, count: usize) -> crate::Result<Vec<StreamEntry>>;

    /// Stream metadata; zeroed when the stream does not exist.
    async fn stream_info(&self, stream: &str) -> crate::Result<StreamInfo>;

    /// Release the connection. Later calls fail with `Unavailable`.
    async fn close(&self) -> crate::Result<()>;
}
