//! Connection timing configuration

use std::time::Duration;

/// Timings and limits for an [`AgentConnection`](crate::AgentConnection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTimings {
    /// Base delay of the linear reconnection backoff
    pub reconnect_delay: Duration,

    /// Automatic reconnection attempts before a manual retry is required
    pub max_reconnect_attempts: u32,

    /// Read deadline, renewed on every payload and keep-alive reply
    pub idle_timeout: Duration,

    /// Interval between keep-alive pings
    pub keep_alive_interval: Duration,

    /// Deadline for a single frame write
    pub write_timeout: Duration,

    /// Deadline for the WebSocket opening handshake
    pub handshake_timeout: Duration,

    /// Capacity of the outbound command queue
    pub queue_capacity: usize,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            idle_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            queue_capacity: 100,
        }
    }
}

impl ConnectionTimings {
    pub fn with_reconnect(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }
}
