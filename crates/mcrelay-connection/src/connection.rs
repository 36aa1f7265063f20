//! Per-agent connection state machine
//!
//! One [`AgentConnection`] owns at most one open transport to its agent at any instant.
//! A single manage task dials, runs a read pump and a write pump while the transport is
//! up, and decides what to do when it goes down:
//!
//! - dial succeeded: reset the backoff and relay until a pump fails, a manual retry
//!   arrives, or the connection is shut down
//! - agent answered 401: park in `error` until [`AgentConnection::retry`]
//! - any other failure: linear backoff (5s, 10s, ... 25s), then park in `error`
//!   until a manual retry
//!
//! Shutdown cancels `done`. Every session token is a child of `done`, so cancelling it
//! tears down the pumps and the transport as well.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use futures::{SinkExt, StreamExt};

use crate::backoff::LinearBackoff;
use crate::config::ConnectionTimings;
use crate::descriptor::AgentDescriptor;
use crate::error::ConnectionError;
use crate::signal::RetrySignal;
use crate::status::{ConnectionStats, ConnectionStatus};
use crate::transport::{
    DialError, DialRequest, Dialer, Frame, FrameSink, FrameStream, Transport, TransportError,
};

/// Identifies one dashboard subscriber of a connection
pub type SubscriberId = Uuid;

pub const AUTH_FAILED_MESSAGE: &str = "authentication failed";
pub const MAX_ATTEMPTS_MESSAGE: &str =
    "max reconnection attempts reached, manual retry required";

#[derive(Debug)]
struct State {
    status: ConnectionStatus,
    last_error: Option<String>,
    auth_failed: bool,
}

/// How a relay session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Retry,
    Failed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Long-lived outbound connection to one agent
pub struct AgentConnection {
    descriptor: AgentDescriptor,
    timings: ConnectionTimings,
    dialer: Arc<dyn Dialer>,

    state: Mutex<State>,
    /// Separate from `subscribers` so bookkeeping never contends with broadcast
    stats: Mutex<ConnectionStats>,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,

    outbound_tx: mpsc::Sender<String>,
    /// Held by the write pump of the current session
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,

    done: CancellationToken,
    retry: RetrySignal,
    started: AtomicBool,
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("id", &self.descriptor.id)
            .field("address", &self.descriptor.address)
            .field("status", &self.status())
            .finish()
    }
}

impl AgentConnection {
    pub fn new(
        descriptor: AgentDescriptor,
        timings: ConnectionTimings,
        dialer: Arc<dyn Dialer>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(timings.queue_capacity.max(1));

        Arc::new(Self {
            descriptor,
            timings,
            dialer,
            state: Mutex::new(State {
                status: ConnectionStatus::Disconnected,
                last_error: None,
                auth_failed: false,
            }),
            stats: Mutex::new(ConnectionStats::default()),
            subscribers: Mutex::new(HashMap::new()),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            done: CancellationToken::new(),
            retry: RetrySignal::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the manage task. Returns `None` if it was already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(agent_id = %self.descriptor.id, "Connection already started");
            return None;
        }

        self.set_status(ConnectionStatus::Connecting);
        Some(tokio::spawn(self.clone().manage()))
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.state).status
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    /// Whether the agent rejected our credentials on the last dial
    pub fn is_auth_failed(&self) -> bool {
        lock(&self.state).auth_failed
    }

    pub fn stats(&self) -> ConnectionStats {
        lock(&self.stats).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Request an immediate reconnect with a fresh backoff sequence.
    ///
    /// Rejected while connected or connecting, and after shutdown.
    pub fn retry(&self) -> Result<(), ConnectionError> {
        if self.done.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        {
            let mut state = lock(&self.state);
            match state.status {
                ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                    return Err(ConnectionError::RetryNotAllowed(state.status));
                }
                _ => {
                    state.status = ConnectionStatus::Connecting;
                    state.auth_failed = false;
                }
            }
        }

        info!(agent_id = %self.descriptor.id, "Manual retry requested");
        self.retry.notify();
        Ok(())
    }

    /// Queue a command for the agent without waiting.
    pub fn send_message(&self, message: impl Into<String>) -> Result<(), ConnectionError> {
        if self.done.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(ConnectionError::NotConnected(status));
        }

        match self.outbound_tx.try_send(message.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ConnectionError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(ConnectionError::Closed),
        }
    }

    pub fn add_client(&self, id: SubscriberId, sender: mpsc::Sender<String>) {
        let count = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.insert(id, sender);
            subscribers.len()
        };
        debug!(agent_id = %self.descriptor.id, subscriber = %id, count, "Subscriber added");
    }

    pub fn remove_client(&self, id: &SubscriberId) -> bool {
        let removed = lock(&self.subscribers).remove(id).is_some();
        if removed {
            debug!(agent_id = %self.descriptor.id, subscriber = %id, "Subscriber removed");
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Stop the manage loop for good. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.done.is_cancelled() {
            info!(agent_id = %self.descriptor.id, "Shutting down agent connection");
        }
        self.done.cancel();
    }

    fn dial_request(&self) -> DialRequest {
        DialRequest {
            address: self.descriptor.address.clone(),
            basic_auth: self.descriptor.basic_auth(),
            shared_key: self.descriptor.shared_key.clone(),
            handshake_timeout: self.timings.handshake_timeout,
        }
    }

    async fn manage(self: Arc<Self>) {
        let mut backoff = LinearBackoff::new(
            self.timings.reconnect_delay,
            self.timings.max_reconnect_attempts,
        );
        let request = self.dial_request();

        loop {
            if self.done.is_cancelled() {
                break;
            }

            // A retry that raced the end of a backoff sleep still earns a fresh sequence.
            if self.retry.clear() {
                backoff.reset();
            }
            self.set_status(ConnectionStatus::Connecting);
            debug!(agent_id = %self.descriptor.id, address = %request.address, "Dialing agent");

            let result = tokio::select! {
                _ = self.done.cancelled() => break,
                result = self.dialer.dial(&request) => result,
            };
            lock(&self.stats).reconnections += 1;

            match result {
                Ok(transport) => {
                    backoff.reset();
                    self.mark_connected();

                    match self.run_session(transport).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Retry => backoff.reset(),
                        SessionEnd::Failed => {}
                    }
                }
                Err(DialError::Unauthorized) => {
                    warn!(
                        agent_id = %self.descriptor.id,
                        "Agent rejected credentials, waiting for manual retry"
                    );
                    self.mark_auth_failed();

                    if !self.wait_for_retry().await {
                        break;
                    }
                    backoff.reset();
                }
                Err(e) => {
                    self.mark_error(e.to_string());

                    match backoff.next_delay() {
                        Some(delay) => {
                            warn!(
                                agent_id = %self.descriptor.id,
                                attempt = backoff.attempt(),
                                "Dial failed: {}. Reconnecting in {:?}",
                                e,
                                delay
                            );
                            self.set_status(ConnectionStatus::Reconnecting);

                            tokio::select! {
                                biased;
                                _ = self.done.cancelled() => break,
                                _ = self.retry.wait() => backoff.reset(),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            warn!(
                                agent_id = %self.descriptor.id,
                                "Dial failed: {}. Giving up until manual retry",
                                e
                            );
                            self.mark_error(MAX_ATTEMPTS_MESSAGE.to_string());

                            if !self.wait_for_retry().await {
                                break;
                            }
                            backoff.reset();
                        }
                    }
                }
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        info!(agent_id = %self.descriptor.id, "Agent connection stopped");
    }

    /// Park until a manual retry. Returns false on shutdown.
    async fn wait_for_retry(&self) -> bool {
        tokio::select! {
            _ = self.done.cancelled() => false,
            _ = self.retry.wait() => true,
        }
    }

    async fn run_session(self: &Arc<Self>, transport: Transport) -> SessionEnd {
        let session = self.done.child_token();
        let Transport { sink, stream } = transport;

        let reader = tokio::spawn(self.clone().read_pump(stream, session.clone()));
        let writer = tokio::spawn(self.clone().write_pump(sink, session.clone()));

        let end = tokio::select! {
            biased;
            _ = self.done.cancelled() => SessionEnd::Shutdown,
            _ = self.retry.wait() => SessionEnd::Retry,
            _ = session.cancelled() => SessionEnd::Failed,
        };

        session.cancel();
        // The transport is released only once both halves are gone.
        let _ = reader.await;
        let _ = writer.await;

        debug!(agent_id = %self.descriptor.id, ?end, "Session ended");
        end
    }

    async fn read_pump(self: Arc<Self>, mut stream: FrameStream, session: CancellationToken) {
        let idle = self.timings.idle_timeout;
        let mut deadline = Instant::now() + idle;

        loop {
            let next = tokio::select! {
                _ = session.cancelled() => break,
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };

            match next {
                Ok(Some(Ok(Frame::Text(line)))) => {
                    deadline = Instant::now() + idle;
                    {
                        let mut stats = lock(&self.stats);
                        stats.messages_received += 1;
                        stats.last_message_at = Some(Utc::now());
                    }
                    self.broadcast(&line);
                }
                Ok(Some(Ok(Frame::Pong(_)))) => {
                    deadline = Instant::now() + idle;
                }
                Ok(Some(Ok(Frame::Ping(_)))) => {}
                Ok(Some(Ok(Frame::Close))) => {
                    self.session_failed(&session, "read error: agent closed the connection");
                    break;
                }
                Ok(Some(Err(e))) => {
                    self.session_failed(&session, format!("read error: {}", e));
                    break;
                }
                Ok(None) => {
                    self.session_failed(&session, format!("read error: {}", TransportError::Closed));
                    break;
                }
                Err(_) => {
                    self.session_failed(
                        &session,
                        format!("read error: {}", TransportError::IdleTimeout(idle)),
                    );
                    break;
                }
            }
        }
    }

    async fn write_pump(self: Arc<Self>, mut sink: FrameSink, session: CancellationToken) {
        let write_timeout = self.timings.write_timeout;
        let period = self.timings.keep_alive_interval;
        let mut keep_alive = tokio::time::interval_at(Instant::now() + period, period);
        let mut outbound = self.outbound_rx.lock().await;

        loop {
            tokio::select! {
                biased;
                _ = session.cancelled() => {
                    let close = async {
                        sink.send(Frame::Close).await?;
                        sink.close().await
                    };
                    let closed = timeout(write_timeout, close)
                        .await
                        .unwrap_or(Err(TransportError::WriteTimeout(write_timeout)));
                    if let Err(e) = closed {
                        debug!(agent_id = %self.descriptor.id, "Close frame not delivered: {}", e);
                    }
                    break;
                }
                message = outbound.recv() => {
                    let Some(message) = message else {
                        session.cancel();
                        break;
                    };

                    let sent = timeout(write_timeout, sink.send(Frame::Text(message)))
                        .await
                        .unwrap_or(Err(TransportError::WriteTimeout(write_timeout)));

                    if let Err(e) = sent {
                        self.session_failed(&session, format!("write error: {}", e));
                        break;
                    }

                    self.record_sent();
                }
                _ = keep_alive.tick() => {
                    let sent = timeout(write_timeout, sink.send(Frame::Ping(Vec::new())))
                        .await
                        .unwrap_or(Err(TransportError::WriteTimeout(write_timeout)));

                    if let Err(e) = sent {
                        self.session_failed(&session, format!("ping error: {}", e));
                        break;
                    }
                }
            }
        }
    }

    fn record_sent(&self) {
        let mut stats = lock(&self.stats);
        stats.messages_sent += 1;
        stats.last_message_at = Some(Utc::now());
    }

    /// Deliver one inbound line to every subscriber, dropping those that cannot keep up
    fn broadcast(&self, line: &str) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|id, sender| match sender.try_send(line.to_string()) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    agent_id = %self.descriptor.id,
                    subscriber = %id,
                    "Dropping subscriber: {}",
                    e
                );
                false
            }
        });
    }

    /// Record a pump failure and end the session. No-op once teardown has begun.
    fn session_failed(&self, session: &CancellationToken, reason: impl Into<String>) {
        let reason = reason.into();
        if self.done.is_cancelled() || session.is_cancelled() {
            debug!(agent_id = %self.descriptor.id, "Ignoring failure during teardown: {}", reason);
            return;
        }

        warn!(agent_id = %self.descriptor.id, "Session failed: {}", reason);
        self.mark_error(reason);
        session.cancel();
    }

    fn set_status(&self, status: ConnectionStatus) {
        lock(&self.state).status = status;
    }

    fn mark_connected(&self) {
        {
            let mut state = lock(&self.state);
            state.status = ConnectionStatus::Connected;
            state.last_error = None;
            state.auth_failed = false;
        }
        lock(&self.stats).connected_at = Some(Utc::now());
        info!(agent_id = %self.descriptor.id, address = %self.descriptor.address, "Connected to agent");
    }

    fn mark_error(&self, message: String) {
        let mut state = lock(&self.state);
        state.status = ConnectionStatus::Error;
        state.last_error = Some(message);
        state.auth_failed = false;
    }

    fn mark_auth_failed(&self) {
        let mut state = lock(&self.state);
        state.status = ConnectionStatus::Error;
        state.last_error = Some(AUTH_FAILED_MESSAGE.to_string());
        state.auth_failed = true;
    }
}

impl Drop for AgentConnection {
    fn drop(&mut self) {
        self.done.cancel();
    }
}
