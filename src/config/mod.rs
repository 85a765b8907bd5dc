//! Configuration
//!
//! Server configuration is read from a JSON5 file, then overridden by
//! `POLLCAST_*` environment variables, then by CLI flags (applied by the
//! caller). A missing file is not an error; every field has a default.

use crate::logging::{LogFormat, LoggingConfig};
use crate::store::file::DEFAULT_DATA_FILE;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "POLLCAST_CONFIG";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default bind address.
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub ws: WsConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Resolve the listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind.parse().map_err(|_| ConfigError::Invalid {
            key: "server.bind".to_string(),
            reason: format!("'{}' is not an IP address", self.bind),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Which State Store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Data file for the `file` backend.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from(DEFAULT_DATA_FILE),
        }
    }
}

/// Persistent channel behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsConfig {
    /// Push the current document to a channel as soon as it opens.
    pub snapshot_on_connect: bool,
    /// Answer ignored actions with an error frame to the sender.
    pub report_rejections: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            snapshot_on_connect: true,
            report_rejections: false,
        }
    }
}

/// Cross-origin settings. An empty list allows any origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;
        if self.store.backend == StoreBackend::File && self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                key: "store.path".to_string(),
                reason: "must not be empty for the file backend".to_string(),
            });
        }
        Ok(())
    }
}

/// Default config file location: `<config dir>/pollcast/config.json5`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pollcast")
        .join("config.json5")
}

/// Resolve the config file path: explicit flag, then `POLLCAST_CONFIG`,
/// then the default location.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

/// Parse config file contents.
pub fn parse_config(raw: &str) -> Result<Config, ConfigError> {
    json5::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Load the config file at `path` (defaults if absent) and apply
/// environment overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => parse_config(&raw)?,
        Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    apply_env_overrides(&mut config, |key| env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Apply `POLLCAST_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(bind) = lookup("POLLCAST_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = lookup("POLLCAST_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::Invalid {
            key: "POLLCAST_PORT".to_string(),
            reason: format!("'{}' is not a port number", port),
        })?;
    }
    if let Some(path) = lookup("POLLCAST_STORE_PATH") {
        config.store.path = PathBuf::from(path);
    }
    if let Some(level) = lookup("POLLCAST_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = lookup("POLLCAST_LOG_FORMAT") {
        config.logging.format =
            format
                .parse::<LogFormat>()
                .map_err(|reason| ConfigError::Invalid {
                    key: "POLLCAST_LOG_FORMAT".to_string(),
                    reason,
                })?;
    }
    Ok(())
}
