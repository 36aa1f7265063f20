//! Static description of one remote agent

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default game port used when a status address has to be derived
pub const DEFAULT_STATUS_PORT: u16 = 19132;

/// Identity, dial target and credentials of one agent, as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    /// WebSocket URL of the agent's console endpoint
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_key: Option<String>,
    /// Explicit `host:port` for status probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_address: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("invalid agent address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            username: None,
            password: None,
            shared_key: None,
            status_address: None,
        }
    }

    pub fn with_shared_key(mut self, key: impl Into<String>) -> Self {
        self.shared_key = Some(key.into());
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_status_address(mut self, address: impl Into<String>) -> Self {
        self.status_address = Some(address.into());
        self
    }

    /// Basic-auth pair, present only when a non-empty username is configured
    pub fn basic_auth(&self) -> Option<(String, String)> {
        match self.username.as_deref() {
            Some(user) if !user.is_empty() => Some((
                user.to_string(),
                self.password.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    /// Address the status probe should query.
    ///
    /// Uses `status_address` when configured. Otherwise takes the host of the relay URL,
    /// maps `localhost` to `127.0.0.1`, and appends `default_port`.
    pub fn status_target(&self, default_port: u16) -> Result<String, DescriptorError> {
        if let Some(addr) = self.status_address.as_deref().filter(|a| !a.is_empty()) {
            return Ok(addr.to_string());
        }

        let url = Url::parse(&self.address).map_err(|e| DescriptorError::InvalidAddress {
            address: self.address.clone(),
            reason: e.to_string(),
        })?;

        let host = match url.host_str() {
            Some("localhost") => "127.0.0.1",
            Some(host) => host,
            None => {
                return Err(DescriptorError::InvalidAddress {
                    address: self.address.clone(),
                    reason: "missing host".to_string(),
                })
            }
        };

        Ok(format!("{}:{}", host, default_port))
    }
}
