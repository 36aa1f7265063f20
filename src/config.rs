//! Center configuration file
//!
//! ```json
//! {
//!   "listen_address": ":8081",
//!   "auth_key": "dashboard-key",
//!   "reconnect": { "delay_secs": 5, "max_attempts": 5 },
//!   "wrappers": [
//!     { "id": "survival", "name": "Survival", "address": "ws://10.0.0.5:8080/ws", "shared_key": "k" }
//!   ]
//! }
//! ```

use mcrelay_connection::{AgentDescriptor, ConnectionTimings, DEFAULT_STATUS_PORT};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid listen address {0:?}")]
    ListenAddress(String),

    #[error(
        "authentication key is required; set AUTH_KEY, pass --auth-key or add auth_key to the config file"
    )]
    MissingAuthKey,
}

fn default_listen_address() -> String {
    ":8081".to_string()
}

fn default_status_port() -> u16 {
    DEFAULT_STATUS_PORT
}

/// Reconnection overrides
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub delay_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CenterConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default)]
    pub auth_key: Option<String>,
    /// Game port probed when a wrapper has no `status_address`
    #[serde(default = "default_status_port")]
    pub default_status_port: u16,
    #[serde(default)]
    pub reconnect: Option<ReconnectConfig>,
    #[serde(default)]
    pub wrappers: Vec<AgentDescriptor>,
}

impl CenterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Pick the dashboard key. A flag or environment value wins over the file.
    pub fn resolve_auth_key(&self, override_key: Option<&str>) -> Result<String, ConfigError> {
        override_key
            .filter(|key| !key.is_empty())
            .or_else(|| self.auth_key.as_deref().filter(|key| !key.is_empty()))
            .map(str::to_string)
            .ok_or(ConfigError::MissingAuthKey)
    }

    pub fn timings(&self) -> ConnectionTimings {
        let timings = ConnectionTimings::default();
        match self.reconnect {
            Some(reconnect) => timings.with_reconnect(
                Duration::from_secs(reconnect.delay_secs),
                reconnect.max_attempts,
            ),
            None => timings,
        }
    }
}

/// Parse a listen address, accepting the bare `":port"` form for all interfaces
pub fn parse_listen_addr(address: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = || ConfigError::ListenAddress(address.to_string());

    let candidate = match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => address.to_string(),
    };

    if let Ok(addr) = candidate.parse() {
        return Ok(addr);
    }

    candidate
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"{
                "listen_address": "127.0.0.1:9000",
                "auth_key": "dash",
                "reconnect": { "delay_secs": 2, "max_attempts": 3 },
                "wrappers": [
                    { "id": "a", "name": "Alpha", "address": "ws://10.0.0.1:8080/ws", "shared_key": "k1" },
                    { "id": "b", "name": "Beta", "address": "ws://10.0.0.2:8080/ws",
                      "username": "ops", "password": "pw", "shared_key": "k2",
                      "status_address": "10.0.0.2:19133" }
                ]
            }"#,
        );

        let config = CenterConfig::load(file.path()).unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:9000");
        assert_eq!(config.wrappers.len(), 2);
        assert_eq!(config.wrappers[1].username.as_deref(), Some("ops"));
        assert_eq!(
            config.wrappers[1].status_address.as_deref(),
            Some("10.0.0.2:19133")
        );

        let timings = config.timings();
        assert_eq!(timings.reconnect_delay, Duration::from_secs(2));
        assert_eq!(timings.max_reconnect_attempts, 3);
    }

    #[test]
    fn test_defaults() {
        let file = write_config(r#"{ "wrappers": [] }"#);
        let config = CenterConfig::load(file.path()).unwrap();

        assert_eq!(config.listen_address, ":8081");
        assert_eq!(config.default_status_port, 19132);
        assert!(config.auth_key.is_none());
        assert_eq!(config.timings(), ConnectionTimings::default());
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let missing = CenterConfig::load("/nonexistent/config.json").unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let file = write_config("{ not json");
        let malformed = CenterConfig::load(file.path()).unwrap_err();
        assert!(matches!(malformed, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_auth_key_priority() {
        let file = write_config(r#"{ "auth_key": "from-file" }"#);
        let config = CenterConfig::load(file.path()).unwrap();

        assert_eq!(config.resolve_auth_key(Some("from-env")).unwrap(), "from-env");
        assert_eq!(config.resolve_auth_key(None).unwrap(), "from-file");
        assert_eq!(config.resolve_auth_key(Some("")).unwrap(), "from-file");

        let empty = write_config("{}");
        let config = CenterConfig::load(empty.path()).unwrap();
        assert!(matches!(
            config.resolve_auth_key(None),
            Err(ConfigError::MissingAuthKey)
        ));
    }

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(
            parse_listen_addr(":8081").unwrap(),
            "0.0.0.0:8081".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_listen_addr("nonsense").is_err());
    }
}
