//! Wrapper console endpoint
//!
//! `GET /ws` streams the console (history first) and writes each inbound frame to the
//! server's stdin. The route sits behind the same shared-key check the gateway uses, so
//! the center's `X-Auth-Key` dial and a browser's `?auth=` both work.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    middleware as axum_middleware,
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use mcrelay_api::middleware::{require_auth, AuthState};
use mcrelay_http_auth::AuthError;
use std::future::Future;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::hub::ConsoleHub;

#[derive(Debug, Clone)]
pub struct WrapperServerConfig {
    pub bind_addr: SocketAddr,
    pub auth_key: String,
}

impl Default for WrapperServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            auth_key: String::new(),
        }
    }
}

struct ConsoleState {
    hub: Arc<ConsoleHub>,
    input: mpsc::UnboundedSender<String>,
}

pub struct WrapperServer {
    config: WrapperServerConfig,
    state: Arc<ConsoleState>,
    auth: Arc<AuthState>,
}

impl WrapperServer {
    /// # Errors
    /// Fails if the configured auth key is empty.
    pub fn new(
        config: WrapperServerConfig,
        hub: Arc<ConsoleHub>,
        input: mpsc::UnboundedSender<String>,
    ) -> Result<Self, AuthError> {
        let auth = Arc::new(AuthState::new(config.auth_key.clone())?);
        Ok(Self {
            config,
            state: Arc::new(ConsoleState { hub, input }),
            auth,
        })
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/ws", get(console_socket))
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(
                self.auth.clone(),
                require_auth,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(
        self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        info!("Console endpoint on ws://{}/ws", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))
    }

    pub async fn start<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }
}

async fn console_socket(State(state): State<Arc<ConsoleState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ConsoleState>) {
    let (id, mut lines) = state.hub.subscribe();
    info!(%id, "Console client connected");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            if sink.send(Message::Text(line.into())).await.is_err() {
                break;
            }
        }
    });

    let reader = async {
        while let Some(message) = stream.next().await {
            let line = match message {
                Ok(Message::Text(text)) => text.as_str().to_owned(),
                Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };

            debug!(%id, "Console input: {}", line);
            if state.input.send(line).is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }

    state.hub.unsubscribe(&id);
    writer.abort();
    info!(%id, "Console client disconnected");
}
