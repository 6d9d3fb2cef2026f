//! Broker configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::error::ConfigError;

/// Tuning for the durable broker and its consumption loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Prefix for stream names (`<prefix>:<event type>`)
    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,

    /// Group used when a subscription names none
    #[serde(default = "default_group")]
    pub default_group: String,

    /// Maximum records fetched per poll; at least 1
    #[serde(default = "default_read_count", deserialize_with = "positive_count")]
    pub read_count: usize,

    /// How long one poll waits for new records; bounds shutdown latency
    #[serde(default = "default_block_timeout", with = "humantime_serde")]
    pub block_timeout: Duration,

    /// Pause after a store error before polling again
    #[serde(default = "default_error_backoff", with = "humantime_serde")]
    pub error_backoff: Duration,

    /// How long `close` waits for each consumption loop
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Consumer name within each group; stable names let a restarted
    /// process pick up records it left unacknowledged
    #[serde(default)]
    pub consumer_name: Option<String>,
}

fn default_stream_prefix() -> String {
    "events".to_string()
}

fn default_group() -> String {
    "default".to_string()
}

fn default_read_count() -> usize {
    10
}

fn positive_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let count = usize::deserialize(deserializer)?;
    if count == 0 {
        return Err(de::Error::custom("read_count must be at least 1"));
    }
    Ok(count)
}

fn default_block_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            stream_prefix: default_stream_prefix(),
            default_group: default_group(),
            read_count: default_read_count(),
            block_timeout: default_block_timeout(),
            error_backoff: default_error_backoff(),
            shutdown_timeout: default_shutdown_timeout(),
            consumer_name: None,
        }
    }
}

impl BrokerConfig {
    /// Parse from TOML; missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    #[must_use]
    pub fn with_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = group.into();
        self
    }

    #[must_use]
    pub fn with_read_count(mut self, count: usize) -> Self {
        self.read_count = count.max(1);
        self
    }

    #[must_use]
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    /// Stream holding records of `event_type`.
    pub fn stream_name(&self, event_type: &str) -> String {
        format!("{}:{}", self.stream_prefix, event_type)
    }

    /// Consumer name used by this process.
    pub fn resolved_consumer_name(&self) -> String {
        self.consumer_name
            .clone()
            .unwrap_or_else(|| format!("consumer-{}", std::process::id()))
    }
}
