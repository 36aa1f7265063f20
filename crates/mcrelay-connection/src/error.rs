//! Caller-visible errors of an agent connection

use crate::status::ConnectionStatus;
use thiserror::Error;

/// Synchronous rejections returned by [`AgentConnection`](crate::AgentConnection)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("wrapper is not connected (status: {0})")]
    NotConnected(ConnectionStatus),

    #[error("message buffer full")]
    QueueFull,

    #[error("connection is closed")]
    Closed,

    #[error("connection is already {0}")]
    RetryNotAllowed(ConnectionStatus),
}
