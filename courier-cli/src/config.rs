//! CLI configuration file
//!
//! ```toml
//! [broker]
//! default_group = "demo"
//! block_timeout = "500ms"
//!
//! [iggy]
//! address = "127.0.0.1:8090"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use courier_core::BrokerConfig;
use courier_log::IggyStoreConfig;
use serde::Deserialize;

/// Looked up in the working directory when no `--config` is given
const DEFAULT_CONFIG_FILE: &str = "courier.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[allow(dead_code)] // Read only by the iggy backend
    #[serde(default)]
    pub iggy: IggyStoreConfig,
}

impl CourierConfig {
    fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Invalid courier config")
    }
}

/// Load `path`, or `./courier.toml` if it exists, or defaults.
pub fn load(path: Option<&Path>) -> Result<CourierConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !fallback.exists() {
                return Ok(CourierConfig::default());
            }
            fallback
        }
    };

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    CourierConfig::from_toml_str(&contents)
}
