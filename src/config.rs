//! Link configuration.

use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::PEER_NAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Advertised name discovery filters on.
    pub peer_name: String,

    /// Treat a failed status subscription as a connection failure instead
    /// of tolerating a session without telemetry.
    pub require_telemetry: bool,

    /// Reconnect once, by retained identity, when the link drops
    /// unexpectedly. Explicit disconnects never reconnect.
    pub auto_reconnect: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            peer_name: PEER_NAME.to_string(),
            require_telemetry: false,
            auto_reconnect: true,
        }
    }
}

impl LinkConfig {
    /// Loads the config from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the current config as JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let config_json = serde_json::to_string_pretty(self)?;
        fs::write(path, config_json).await?;

        info!("Config saved to {:?}.", path);
        Ok(())
    }
}
