//! Dashboard console relay
//!
//! `GET /ws?wrapper=<id>` upgrades to a WebSocket and subscribes it to the wrapper's
//! console. Lines from the wrapper are pushed to the socket; text typed by the operator
//! is queued toward the wrapper as a command.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use mcrelay_connection::{AgentConnection, ConnectionStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::handlers::resolve_wrapper;
use crate::models::WrapperQuery;
use crate::AppState;

/// Lines buffered per dashboard socket before it is treated as stalled and dropped
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Relay socket endpoint
///
/// The wrapper is resolved before the upgrade so unknown ids get a plain 400/404.
pub async fn relay_socket(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WrapperQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let connection = match resolve_wrapper(&state, &query) {
        Ok(connection) => connection,
        Err(rejection) => return rejection.into_response(),
    };

    match upgrade {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, connection))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, connection: Arc<AgentConnection>) {
    let subscriber = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<String>(SUBSCRIBER_BUFFER);

    // The connection owns the only strong sender, so eviction closes this socket.
    let diagnostics = tx.downgrade();
    connection.add_client(subscriber, tx);

    info!(
        agent_id = %connection.id(),
        %subscriber,
        clients = connection.client_count(),
        "Dashboard client connected"
    );

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if sink.send(Message::Text(line.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = async {
        while let Some(message) = stream.next().await {
            let command = match message {
                Ok(Message::Text(text)) => text.as_str().to_owned(),
                Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };

            if let Some(reply) = forward_command(&connection, command) {
                if let Some(tx) = diagnostics.upgrade() {
                    let _ = tx.try_send(reply);
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }

    connection.remove_client(&subscriber);
    writer.abort();

    info!(agent_id = %connection.id(), %subscriber, "Dashboard client disconnected");
}

/// Queue a command, returning the diagnostic line to show the operator if it was not sent
fn forward_command(connection: &AgentConnection, command: String) -> Option<String> {
    let status = connection.status();
    if status != ConnectionStatus::Connected {
        let error = connection.last_error().unwrap_or_default();
        return Some(format!("Error: Wrapper is {} - {}", status, error));
    }

    match connection.send_message(command) {
        Ok(()) => None,
        Err(e) => {
            debug!(agent_id = %connection.id(), "Command rejected: {}", e);
            Some(format!("Error sending command: {}", e))
        }
    }
}
