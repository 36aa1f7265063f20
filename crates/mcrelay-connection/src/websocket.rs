//! WebSocket dialer backed by tokio-tungstenite

use async_trait::async_trait;
use futures::future::ready;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use crate::transport::{DialError, DialRequest, Dialer, Frame, Transport, TransportError};

/// Dials agents over `ws://` or `wss://`
#[derive(Debug, Clone, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, request: &DialRequest) -> Result<Transport, DialError> {
        let invalid = |reason: String| DialError::InvalidAddress {
            address: request.address.clone(),
            reason,
        };

        let mut ws_request = request
            .address
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;

        for (name, value) in request.headers() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(&value).map_err(|e| invalid(e.to_string()))?;
            ws_request.headers_mut().insert(name, value);
        }

        debug!("Dialing agent at {}", request.address);

        let (ws_stream, _response) = tokio::time::timeout(
            request.handshake_timeout,
            tokio_tungstenite::connect_async(ws_request),
        )
        .await
        .map_err(|_| DialError::Timeout(request.handshake_timeout))?
        .map_err(classify)?;

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(|e| TransportError::WebSocket(e.to_string()))
            .with(|frame: Frame| ready(Ok::<_, TransportError>(to_message(frame))));

        let stream = stream.filter_map(|msg| ready(from_message(msg)));

        Ok(Transport::new(sink, stream))
    }
}

fn classify(err: tungstenite::Error) -> DialError {
    match err {
        tungstenite::Error::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            DialError::Unauthorized
        }
        tungstenite::Error::Http(response) => {
            let message = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .unwrap_or_default();
            DialError::HttpStatus {
                status: response.status().as_u16(),
                message,
            }
        }
        other => DialError::Connect(other.to_string()),
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Ping(payload) => Message::Ping(payload),
        Frame::Pong(payload) => Message::Pong(payload),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(msg: Result<Message, tungstenite::Error>) -> Option<Result<Frame, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        // Agents only speak text; binary payloads are relayed as lossy UTF-8.
        Ok(Message::Binary(data)) => Some(Ok(Frame::Text(
            String::from_utf8_lossy(&data).into_owned(),
        ))),
        Ok(Message::Ping(payload)) => Some(Ok(Frame::Ping(payload))),
        Ok(Message::Pong(payload)) => Some(Ok(Frame::Pong(payload))),
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_becomes_text() {
        let frame = from_message(Ok(Message::Binary(b"hello".to_vec())))
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::Text("hello".to_string()));
    }

    #[test]
    fn test_close_maps_to_close_frame() {
        assert_eq!(to_message(Frame::Close), Message::Close(None));
        assert!(matches!(
            from_message(Ok(Message::Close(None))),
            Some(Ok(Frame::Close))
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = DialRequest {
            address: format!("ws://127.0.0.1:{}/ws", port),
            basic_auth: None,
            shared_key: None,
            handshake_timeout: std::time::Duration::from_secs(2),
        };

        let err = WebSocketDialer::new().dial(&request).await.unwrap_err();
        assert!(matches!(err, DialError::Connect(_)));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let request = DialRequest {
            address: "not a url".to_string(),
            basic_auth: None,
            shared_key: None,
            handshake_timeout: std::time::Duration::from_secs(2),
        };

        let err = WebSocketDialer::new().dial(&request).await.unwrap_err();
        assert!(matches!(err, DialError::InvalidAddress { .. }));
    }
}
