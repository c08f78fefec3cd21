//! Core engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Background worker threads; recursive enumeration parks one worker
    /// per slow consumer, so size this above the expected concurrency.
    pub worker_threads: usize,

    /// Buffer size for file-content output streams
    pub output_buffer_size: usize,

    /// Bounded capacity of each request-channel direction
    pub channel_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            output_buffer_size: 4096 * 4,
            channel_capacity: 64,
        }
    }
}

impl CoreConfig {
    /// Load from a TOML file, falling back to defaults if it doesn't exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
