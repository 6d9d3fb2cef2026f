//! Error types for log store operations.

use crate::id::RecordId;

/// Error type for log store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store could not be reached (connection refused, dropped, or closed).
    #[error("log store unavailable: {0}")]
    Unavailable(String),

    /// An explicit record id was not strictly greater than the stream's last id.
    #[error("record id {requested} rejected on '{stream}': must be greater than {last}")]
    DuplicateOrOutOfOrderId {
        stream: String,
        requested: RecordId,
        last: RecordId,
    },

    /// The consumer group has not been created on the stream.
    #[error("no consumer group '{group}' on '{stream}'")]
    NoGroup { stream: String, group: String },

    /// A record id string could not be parsed.
    #[error("invalid record id: {0}")]
    InvalidId(String),

    /// A stored record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error reported by the Iggy server or SDK.
    #[cfg(feature = "iggy")]
    #[error("iggy error: {0}")]
    Iggy(String),
}

impl Error {
    /// Whether this error means the store itself could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(feature = "iggy")]
impl From<iggy::prelude::IggyError> for Error {
    fn from(e: iggy::prelude::IggyError) -> Self {
        let msg = e.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("connection")
            || lower.contains("disconnected")
            || lower.contains("not connected")
            || lower.contains("broken pipe")
            || lower.contains("reset")
        {
            Self::Unavailable(msg)
        } else {
            Self::Iggy(msg)
        }
    }
}

/// Result type alias for log store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_error_names_both_ids() {
        let error = Error::DuplicateOrOutOfOrderId {
            stream: "events:AuctionEnded".to_string(),
            requested: RecordId::new(5, 0),
            last: RecordId::new(7, 1),
        };
        let text = error.to_string();
        assert!(text.contains("5-0"));
        assert!(text.contains("7-1"));
        assert!(text.contains("events:AuctionEnded"));
    }

    #[test]
    fn only_unavailable_is_unavailable() {
        assert!(Error::Unavailable("down".to_string()).is_unavailable());
        assert!(!Error::InvalidId("x".to_string()).is_unavailable());
    }
}
