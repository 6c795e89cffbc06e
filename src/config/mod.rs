//! # Configuration Management Module
//!
//! TOML-backed configuration for the bot, loaded once at startup and
//! immutable for the process lifetime.
//!
//! Sections:
//!
//! - [`BotConfig`] - identity and operator-facing strings
//! - [`ConnectionConfig`] - device link settings (serial or tcp)
//! - [`SupervisorConfig`] - heartbeat, retry and poll cadence
//! - [`StorageConfig`] - node database location
//! - [`ActionsConfig`] - action manifest directory
//! - [`LoggingConfig`] - verbosity and optional log file
//!
//! Precedence: CLI args > config file > defaults. `meshbot init` writes a
//! default file to edit.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "meshbot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// "serial" or "tcp".
    pub kind: String,
    /// Serial device path.
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    /// Device address for tcp links.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    115200
}

fn default_tcp_port() -> u16 {
    4403
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: "serial".to_string(),
            port: default_port(),
            baud_rate: default_baud(),
            host: None,
            tcp_port: default_tcp_port(),
        }
    }
}

/// Cadence knobs for the connection supervisor and the dispatch poll.
/// All fixed intervals: availability over precision, no exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between liveness probes on a healthy link.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Seconds between reconnect attempts after the link drops.
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
    /// Seconds between timer ticks of the dispatch loop. Must stay below
    /// every configured action interval.
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_retry_secs() -> u64 {
    30
}

fn default_poll_secs() -> u64 {
    1
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            retry_secs: default_retry_secs(),
            poll_interval_secs: default_poll_secs(),
        }
    }
}

impl SupervisorConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the sled node database.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Directory scanned for action manifests (`*.toml`).
    pub dir: String,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            dir: "./actions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("meshbot.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bot: BotConfig::default(),
            connection: ConnectionConfig::default(),
            supervisor: SupervisorConfig::default(),
            storage: StorageConfig::default(),
            actions: ActionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
