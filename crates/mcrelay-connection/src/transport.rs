//! Transport abstraction between an agent connection and the network
//!
//! The connection state machine only sees [`Frame`]s flowing through a boxed sink and stream,
//! so the WebSocket dialer and the in-memory transport used by tests are interchangeable.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// A single frame on the agent transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Console line (inbound) or command (outbound)
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Errors raised by an open transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("no frame received within {0:?}")]
    IdleTimeout(Duration),
}

/// Errors raised while opening a transport
#[derive(Debug, Error)]
pub enum DialError {
    /// The agent rejected our credentials; never retried automatically
    #[error("authentication failed")]
    Unauthorized,

    #[error("handshake rejected with HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Everything a dialer needs for one attempt
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub address: String,
    pub basic_auth: Option<(String, String)>,
    pub shared_key: Option<String>,
    pub handshake_timeout: Duration,
}

impl DialRequest {
    /// Handshake headers: `Authorization: Basic` when credentials are set, and `X-Auth-Key`
    /// when a shared key is set.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some((user, password)) = &self.basic_auth {
            let encoded = STANDARD.encode(format!("{}:{}", user, password));
            headers.push(("Authorization", format!("Basic {}", encoded)));
        }

        if let Some(key) = self.shared_key.as_deref().filter(|k| !k.is_empty()) {
            headers.push(("X-Auth-Key", key.to_string()));
        }

        headers
    }
}

/// Opens transports to agents
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, request: &DialRequest) -> Result<Transport, DialError>;
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open, split transport
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// In-memory transport. The returned [`MemoryPeer`] plays the remote agent.
    pub fn memory(capacity: usize) -> (Transport, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::channel::<Frame>(capacity);
        let (in_tx, in_rx) = mpsc::channel::<Result<Frame, TransportError>>(capacity);

        let sink = out_tx.sink_map_err(|_| TransportError::Closed);
        let transport = Transport::new(sink, in_rx);

        (
            transport,
            MemoryPeer {
                received: out_rx,
                sender: in_tx,
            },
        )
    }
}

/// Remote end of [`Transport::memory`]
pub struct MemoryPeer {
    /// Frames written by the local side
    pub received: mpsc::Receiver<Frame>,
    /// Frames (or errors) delivered to the local side
    pub sender: mpsc::Sender<Result<Frame, TransportError>>,
}

impl MemoryPeer {
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), TransportError> {
        self.sender
            .send(Ok(Frame::Text(text.into())))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Inject a read failure on the local side
    pub async fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.sender
            .send(Err(TransportError::WebSocket(reason.into())))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next frame written by the local side, `None` once it dropped its sink
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.received.next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_with_all_credentials() {
        let request = DialRequest {
            address: "ws://h/ws".to_string(),
            basic_auth: Some(("admin".to_string(), "secret".to_string())),
            shared_key: Some("k1".to_string()),
            handshake_timeout: Duration::from_secs(10),
        };

        let headers = request.headers();
        assert_eq!(
            headers,
            vec![
                ("Authorization", "Basic YWRtaW46c2VjcmV0".to_string()),
                ("X-Auth-Key", "k1".to_string()),
            ]
        );
    }

    #[test]
    fn test_headers_skip_empty_key() {
        let request = DialRequest {
            address: "ws://h/ws".to_string(),
            basic_auth: None,
            shared_key: Some(String::new()),
            handshake_timeout: Duration::from_secs(10),
        };
        assert!(request.headers().is_empty());
    }

    #[tokio::test]
    async fn test_memory_transport_both_directions() {
        let (mut transport, mut peer) = Transport::memory(4);

        transport.sink.send(Frame::Text("list".into())).await.unwrap();
        assert_eq!(peer.next_frame().await, Some(Frame::Text("list".into())));

        peer.send_text("There are 0 players").await.unwrap();
        let frame = transport.stream.next().await.unwrap().unwrap();
        assert_eq!(frame, Frame::Text("There are 0 players".into()));

        drop(peer);
        assert!(transport.stream.next().await.is_none());
    }
}
