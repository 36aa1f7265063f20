use chrono::{DateTime, Utc};
use mcrelay_connection::{AgentConnection, ConnectionStats, ConnectionStatus};
use mcrelay_status::ServerStatus;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Wrapper connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WrapperStatus {
    /// Not connected and not trying
    Disconnected,
    /// Dial in progress
    Connecting,
    /// Relaying console traffic
    Connected,
    /// Last attempt failed; see `error`
    Error,
    /// Waiting out the backoff before the next dial
    Reconnecting,
}

impl From<ConnectionStatus> for WrapperStatus {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Disconnected => WrapperStatus::Disconnected,
            ConnectionStatus::Connecting => WrapperStatus::Connecting,
            ConnectionStatus::Connected => WrapperStatus::Connected,
            ConnectionStatus::Error => WrapperStatus::Error,
            ConnectionStatus::Reconnecting => WrapperStatus::Reconnecting,
        }
    }
}

/// Running statistics of a wrapper connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WrapperStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Completed dial attempts, successful or not
    pub reconnections: u64,
}

impl From<ConnectionStats> for WrapperStats {
    fn from(stats: ConnectionStats) -> Self {
        Self {
            connected_at: stats.connected_at,
            last_message_at: stats.last_message_at,
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
            reconnections: stats.reconnections,
        }
    }
}

/// One configured wrapper. Credentials are never exposed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Wrapper {
    pub id: String,
    pub name: String,
    pub address: String,
    pub status: WrapperStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: WrapperStats,
}

impl From<&AgentConnection> for Wrapper {
    fn from(connection: &AgentConnection) -> Self {
        let descriptor = connection.descriptor();
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            address: descriptor.address.clone(),
            status: connection.status().into(),
            error: connection.last_error(),
            stats: connection.stats().into(),
        }
    }
}

/// Game server status as reported by the status probe
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusResponse {
    pub server_name: String,
    pub version_name: String,
    pub level_name: String,
    pub game_mode: String,
    pub player_count: i64,
    pub max_player_count: i64,
}

impl From<ServerStatus> for ServerStatusResponse {
    fn from(status: ServerStatus) -> Self {
        Self {
            server_name: status.server_name,
            version_name: status.version_name,
            level_name: status.level_name,
            game_mode: status.game_mode,
            player_count: status.player_count,
            max_player_count: status.max_player_count,
        }
    }
}

/// Accepted manual retry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetryResponse {
    pub id: String,
    pub status: WrapperStatus,
}

/// `?wrapper=<id>` selector shared by the per-wrapper endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WrapperQuery {
    pub wrapper: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Registered wrappers
    pub wrappers: usize,
    /// Wrappers currently connected
    pub connected: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
        }
    }
}
