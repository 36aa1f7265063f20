//! Connection status and running statistics

use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle state of an agent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running statistics for one agent connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    /// When the current (or last) transport was established
    pub connected_at: Option<DateTime<Utc>>,
    /// Last payload sent or received
    pub last_message_at: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Completed dial attempts, successful or not
    pub reconnections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            format!("Wrapper is {}", ConnectionStatus::Error),
            "Wrapper is error"
        );
    }
}
