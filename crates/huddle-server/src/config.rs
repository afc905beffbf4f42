//! Server configuration.
//!
//! Settings are layered, later layers winning:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config` or `HUDDLE_CONFIG`)
//! 3. `HUDDLE_*` environment variables
//! 4. Command-line flags
//!
//! # Environment Variables
//!
//! - `HUDDLE_BIND`: Listen address. Default: `0.0.0.0:3000`
//! - `HUDDLE_UPLOAD_DIR`: Directory for uploaded files. Default: `./uploads`
//! - `HUDDLE_TOKEN_SECRET`: Key for signing session tokens. Random per process if unset
//! - `HUDDLE_TOKEN_TTL_SECS`: Session token lifetime. Default: 86400
//! - `HUDDLE_JSON_LOGS`: Emit JSON log lines (`true`/`false`)
//! - `HUDDLE_REGISTRATION_POLICY`: `replace` or `reject`
//! - `HUDDLE_OFFLINE_POLICY`: `drop` or `notify`
//! - `HUDDLE_ROOM_SEND_POLICY`: `members` or `open`
//! - `HUDDLE_RETENTION_LIMIT`: Messages kept per partition, `0` for unbounded
//! - `HUDDLE_MAX_PAGE_SIZE`: Upper bound for history page sizes
//! - `HUDDLE_MAX_UPLOAD_BYTES`: Largest accepted upload
//! - `HUDDLE_RECONNECT_GRACE_SECS`: How long a dropped user's rooms are kept
//!   for a resumed session, `0` to disable. Default: 120
//!
//! Queue sizes (`hub.command_buffer`, `hub.outbound_buffer`) must be at least 1.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use huddle_hub::{
    HubConfig, OfflinePolicy, ReconnectPolicy, RegistrationPolicy, RetentionPolicy,
    RoomSendPolicy,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Huddle - real-time group messaging server
#[derive(Debug, Default, Parser)]
#[command(name = "huddle-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "HUDDLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g. 127.0.0.1:3000)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Directory for uploaded files
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Effective server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub upload_dir: PathBuf,
    /// Key for signing session tokens
    pub token_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub json_logs: bool,
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            upload_dir: PathBuf::from("./uploads"),
            token_secret: None,
            token_ttl_secs: 24 * 60 * 60,
            json_logs: false,
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build the effective configuration from every layer.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let buffers = [
            ("hub.command_buffer", self.hub.command_buffer),
            ("hub.outbound_buffer", self.hub.outbound_buffer),
        ];
        for (key, size) in buffers {
            if size == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: size.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `HUDDLE_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HUDDLE_BIND") {
            self.bind = parse_value("HUDDLE_BIND", value)?;
        }
        if let Some(value) = lookup("HUDDLE_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("HUDDLE_TOKEN_SECRET") {
            self.token_secret = Some(value).filter(|s| !s.is_empty());
        }
        if let Some(value) = lookup("HUDDLE_TOKEN_TTL_SECS") {
            self.token_ttl_secs = parse_value("HUDDLE_TOKEN_TTL_SECS", value)?;
        }
        if let Some(value) = lookup("HUDDLE_JSON_LOGS") {
            self.json_logs = parse_value("HUDDLE_JSON_LOGS", value)?;
        }
        if let Some(value) = lookup("HUDDLE_REGISTRATION_POLICY") {
            self.hub.registration = RegistrationPolicy::from_name(&value).ok_or(
                ConfigError::InvalidValue {
                    key: "HUDDLE_REGISTRATION_POLICY",
                    value,
                },
            )?;
        }
        if let Some(value) = lookup("HUDDLE_OFFLINE_POLICY") {
            self.hub.offline = OfflinePolicy::from_name(&value).ok_or(ConfigError::InvalidValue {
                key: "HUDDLE_OFFLINE_POLICY",
                value,
            })?;
        }
        if let Some(value) = lookup("HUDDLE_ROOM_SEND_POLICY") {
            self.hub.room_send =
                RoomSendPolicy::from_name(&value).ok_or(ConfigError::InvalidValue {
                    key: "HUDDLE_ROOM_SEND_POLICY",
                    value,
                })?;
        }
        if let Some(value) = lookup("HUDDLE_RETENTION_LIMIT") {
            let limit: usize = parse_value("HUDDLE_RETENTION_LIMIT", value)?;
            self.hub.retention = match limit {
                0 => RetentionPolicy::Unbounded,
                limit => RetentionPolicy::MaxMessages { limit },
            };
        }
        if let Some(value) = lookup("HUDDLE_MAX_PAGE_SIZE") {
            self.hub.max_page_size = parse_value("HUDDLE_MAX_PAGE_SIZE", value)?;
        }
        if let Some(value) = lookup("HUDDLE_MAX_UPLOAD_BYTES") {
            self.hub.max_upload_bytes = parse_value("HUDDLE_MAX_UPLOAD_BYTES", value)?;
        }
        if let Some(value) = lookup("HUDDLE_RECONNECT_GRACE_SECS") {
            let secs: u64 = parse_value("HUDDLE_RECONNECT_GRACE_SECS", value)?;
            self.hub.reconnect = match secs {
                0 => ReconnectPolicy::Disabled,
                secs => ReconnectPolicy::GraceWindow { secs },
            };
        }
        Ok(())
    }

    /// Apply command-line flags.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = cli.bind {
            self.bind = bind;
        }
        if let Some(dir) = &cli.upload_dir {
            self.upload_dir = dir.clone();
        }
        if cli.json_logs {
            self.json_logs = true;
        }
    }

    /// Log the effective configuration. Secrets are not printed.
    pub fn log_config(&self) {
        info!("Listening address: {}", self.bind);
        info!("Upload directory: {}", self.upload_dir.display());
        info!(
            "Token secret: {}",
            if self.token_secret.is_some() {
                "configured"
            } else {
                "random (tokens do not survive restarts)"
            }
        );
        info!("Registration policy: {:?}", self.hub.registration);
        info!("Offline private messages: {:?}", self.hub.offline);
        info!("Room send policy: {:?}", self.hub.room_send);
        info!("History retention: {:?}", self.hub.retention);
        info!("Reconnect recovery: {:?}", self.hub.reconnect);
        info!("Max upload size: {} bytes", self.hub.max_upload_bytes);
    }

    /// Configuration for tests: loopback bind and a given upload directory.
    #[cfg(test)]
    pub fn test(upload_dir: &Path) -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            upload_dir: upload_dir.to_path_buf(),
            token_secret: Some("test-secret".to_string()),
            ..Self::default()
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
