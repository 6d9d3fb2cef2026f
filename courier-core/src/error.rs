//! Error types for courier-core

use thiserror::Error;

use courier_log::RecordId;

/// Errors surfaced to callers of the broker API
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Log store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Record id {requested} rejected on '{stream}': last id is {last}")]
    DuplicateOrOutOfOrderId {
        stream: String,
        requested: RecordId,
        last: RecordId,
    },

    #[error("Log store error: {0}")]
    Store(courier_log::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Broker is closed")]
    Closed,
}

impl From<courier_log::Error> for BrokerError {
    fn from(e: courier_log::Error) -> Self {
        match e {
            courier_log::Error::Unavailable(msg) => Self::StoreUnavailable(msg),
            courier_log::Error::DuplicateOrOutOfOrderId {
                stream,
                requested,
                last,
            } => Self::DuplicateOrOutOfOrderId {
                stream,
                requested,
                last,
            },
            other => Self::Store(other),
        }
    }
}

/// Errors encoding or decoding the payload wire form
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors loading broker configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
