use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// Where the push channel lives.  One persistent connection, established at
/// session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_url")]
    pub url: String,
}

/// Reconnect policy for the push channel.  Disabled reproduces the
/// connect-once behavior: a dropped channel stays down and the registry goes
/// stale until restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

/// Bind address for the development sensor simulator (`sensor-simd`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between pushed value updates for connected sensors.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_channel_url(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            tick_secs: default_tick_secs(),
        }
    }
}

fn default_channel_url() -> String {
    "ws://127.0.0.1:5000".to_string()
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_initial_delay_secs() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    30.0
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_tick_secs() -> f64 {
    1.0
}

impl Config {
    /// Load the config, writing a default file on first run so the operator
    /// has something to edit.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-dash")
            .join("config.toml")
    }

    /// Data directory for logs.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sensor-dash")
    }
}
