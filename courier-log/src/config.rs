//! Configuration for the Iggy-backed store connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for an Iggy server used as the log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IggyStoreConfig {
    /// TCP address of the Iggy server.
    #[serde(default = "default_address")]
    pub address: String,

    /// Iggy stream holding one topic per courier stream.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Login user.
    #[serde(default = "default_username")]
    pub username: String,

    /// Login password.
    #[serde(default = "default_password")]
    pub password: String,

    /// Interval between polls while emulating a blocking group read.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_address() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_namespace() -> String {
    "courier".to_string()
}

fn default_username() -> String {
    "iggy".to_string()
}

fn default_password() -> String {
    "iggy".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for IggyStoreConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            namespace: default_namespace(),
            username: default_username(),
            password: default_password(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl IggyStoreConfig {
    /// Use a different server address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Use a different Iggy stream for courier topics.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Use different login credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let config = IggyStoreConfig::default();

        assert_eq!(config.address, "127.0.0.1:8090");
        assert_eq!(config.namespace, "courier");
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn config_builder_pattern() {
        let config = IggyStoreConfig::default()
            .with_address("10.0.0.5:9000")
            .with_namespace("auctions")
            .with_credentials("svc", "secret");

        assert_eq!(config.address, "10.0.0.5:9000");
        assert_eq!(config.namespace, "auctions");
        assert_eq!(config.username, "svc");
        assert_eq!(config.password, "secret");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: IggyStoreConfig =
            serde_json::from_str(r#"{"address": "iggy:8090", "poll_interval": "250ms"}"#).unwrap();

        assert_eq!(config.address, "iggy:8090");
        assert_eq!(config.namespace, "courier");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }
}
