//! Bridge configuration
//!
//! Loaded from `~/.config/sensorbridge/config.toml`. Every field has a default,
//! so a missing file or a partial file still yields a usable configuration; only
//! a file that fails to parse is an error.

use crate::dispatch::DispatcherSettings;
use crate::session::SessionSettings;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/sensorbridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub dispatcher: DispatcherSettings,
    pub session: SessionSettings,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Settings of the simulated sensor used by the binary
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Consumer ticks per second
    pub tick_hz: u32,
    /// Delay before the simulated device reports ready
    pub connect_delay_ms: u64,
    /// Interval between raw frames on the producer thread
    pub frame_interval_ms: u64,
    /// Frames sent before the device disconnects; 0 streams until Ctrl-C
    pub frame_count: u64,
    /// Peak tilt of the simulated motion in degrees
    pub amplitude_degrees: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            connect_delay_ms: 250,
            frame_interval_ms: 5,
            frame_count: 1000,
            amplitude_degrees: 60.0,
        }
    }
}

impl BridgeConfig {
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.session = config.session.validated();
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))
    }

    /// Loads `path`, falling back to defaults when the file does not exist
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?
        {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| eyre!("{} ({})", e, path.display()))?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub async fn load_or_default() -> Result<Self> {
        Self::load_from(&Self::default_path()).await
    }

    /// Writes the defaults to `path` unless a file is already there
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?
        {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        tokio::fs::write(path, Self::default().to_toml_string()?)
            .await
            .map_err(|e| eyre!("Failed to write default config: {}", e))?;
        info!("Wrote default config to {}", path.display());
        Ok(())
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
