//! Configuration persistence
//!
//! TOML configuration stored in the platform config directory:
//! - Linux: ~/.config/syncwatch/config.toml
//! - Windows: %APPDATA%\syncwatch\config.toml
//! - macOS: ~/Library/Application Support/syncwatch/config.toml

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionConfig;
use crate::sync::Role;

/// Application name used for the configuration directory
const APP_NAME: &str = "syncwatch";

const DEFAULT_PEER_LISTEN_ADDR: &str = "0.0.0.0:6881";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_RETENTION_SECS: u64 = 20;
const DEFAULT_HEARTBEAT_MS: u64 = 500;
const DEFAULT_RESYNC_THRESHOLD_SECS: f64 = 0.5;
const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Address the peer WebSocket listener binds to
    #[serde(default = "default_peer_listen_addr")]
    pub peer_listen_addr: String,

    /// Address the HTTP server binds to
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Peers to connect to at startup (ws:// or wss://)
    #[serde(default)]
    pub peers: Vec<String>,

    /// Seconds a message id is remembered
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Authority heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Drift in seconds a follower tolerates before seeking
    #[serde(default = "default_resync_threshold_secs")]
    pub resync_threshold_secs: f64,

    /// Seconds to wait for resource metadata before failing a request
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
}

fn default_peer_listen_addr() -> String {
    DEFAULT_PEER_LISTEN_ADDR.to_string()
}

fn default_http_addr() -> String {
    DEFAULT_HTTP_ADDR.to_string()
}

fn default_retention_secs() -> u64 {
    DEFAULT_RETENTION_SECS
}

fn default_heartbeat_ms() -> u64 {
    DEFAULT_HEARTBEAT_MS
}

fn default_resync_threshold_secs() -> f64 {
    DEFAULT_RESYNC_THRESHOLD_SECS
}

fn default_metadata_timeout_secs() -> u64 {
    DEFAULT_METADATA_TIMEOUT_SECS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            peer_listen_addr: default_peer_listen_addr(),
            http_addr: default_http_addr(),
            peers: Vec::new(),
            retention_secs: DEFAULT_RETENTION_SECS,
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            resync_threshold_secs: DEFAULT_RESYNC_THRESHOLD_SECS,
            metadata_timeout_secs: DEFAULT_METADATA_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Validate the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_secs == 0 {
            return Err(ConfigError::Invalid("retention_secs must be positive".into()));
        }
        if self.heartbeat_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_ms must be positive".into()));
        }
        if self.metadata_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "metadata_timeout_secs must be positive".into(),
            ));
        }
        if !self.resync_threshold_secs.is_finite() || self.resync_threshold_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "Invalid resync threshold: {}",
                self.resync_threshold_secs
            )));
        }

        for url in &self.peers {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(ConfigError::Invalid(format!(
                    "Invalid peer URL: {}. Must start with ws:// or wss://",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Append peer URLs not already configured
    pub fn add_peers(&mut self, peers: impl IntoIterator<Item = String>) {
        for peer in peers {
            if !self.peers.contains(&peer) {
                self.peers.push(peer);
            }
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    /// Session settings for `role`
    pub fn session_config(&self, role: Role) -> SessionConfig {
        SessionConfig {
            retention: Duration::from_secs(self.retention_secs),
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            resync_threshold_secs: self.resync_threshold_secs,
            ..SessionConfig::new(role)
        }
    }
}

/// Default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
}

/// `path` if given, otherwise the default location
pub fn config_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path().ok_or(ConfigError::NoConfigDir),
    }
}

/// Load configuration from `path`, or the default location
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = config_path(path)?;

    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Save configuration to `path`, creating parent directories
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    config.validate()?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
