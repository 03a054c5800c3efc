//! Configuration loading

use anyhow::Result;
use crestron_discovery::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Load configuration from `path`, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Write the default configuration to `path`
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
