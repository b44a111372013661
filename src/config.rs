use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the signaling relay listens on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling relay.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// STUN servers handed to the transport engine for NAT traversal.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

fn default_bind_address() -> String {
    "127.0.0.1:13008".to_string()
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:13008".to_string()
}

fn default_stun_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            stun_servers: default_stun_servers(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file, or create default if doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;

        Ok(())
    }
}

/// Get the vidmesh directory (~/.vidmesh)
pub fn get_vidmesh_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vidmesh")
}

/// Get the config file path (~/.vidmesh/config.toml)
pub fn get_config_path() -> PathBuf {
    get_vidmesh_dir().join("config.toml")
}
