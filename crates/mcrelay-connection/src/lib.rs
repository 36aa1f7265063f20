//! Outbound connections to remote console wrappers
//!
//! Every configured wrapper gets one [`AgentConnection`]: a long-running task that dials the
//! wrapper's WebSocket endpoint, keeps it alive, reconnects with linear backoff, and fans out
//! console output to any number of dashboard subscribers.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod signal;
pub mod status;
pub mod transport;
pub mod websocket;

pub use backoff::LinearBackoff;
pub use config::ConnectionTimings;
pub use connection::{AgentConnection, SubscriberId, AUTH_FAILED_MESSAGE, MAX_ATTEMPTS_MESSAGE};
pub use descriptor::{AgentDescriptor, DEFAULT_STATUS_PORT};
pub use error::ConnectionError;
pub use signal::RetrySignal;
pub use status::{ConnectionStats, ConnectionStatus};
pub use transport::{DialError, DialRequest, Dialer, Frame, Transport, TransportError};
pub use websocket::WebSocketDialer;
