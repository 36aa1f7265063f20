//! Registry of agent connections
//!
//! Maps agent id to its [`AgentConnection`]. A single read/write lock guards the map:
//! `get` and `list` share it, `connect` and `disconnect_all` take it exclusively and
//! never hold it across an await.

use mcrelay_connection::{AgentConnection, AgentDescriptor, ConnectionTimings, Dialer};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::task_tracker::TaskTracker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("wrapper {0} is already registered")]
    DuplicateId(String),
}

/// Owns every agent connection for the lifetime of the process
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<AgentConnection>>>,
    dialer: Arc<dyn Dialer>,
    timings: ConnectionTimings,
    tasks: TaskTracker,
}

impl ConnectionRegistry {
    pub fn new(dialer: Arc<dyn Dialer>, timings: ConnectionTimings) -> Self {
        tracing::info!("Creating new connection registry");
        Self {
            connections: RwLock::new(HashMap::new()),
            dialer,
            timings,
            tasks: TaskTracker::new(),
        }
    }

    /// Register an agent and start connecting to it in the background.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if the id is taken; the registry is left
    /// untouched in that case.
    pub fn connect(
        &self,
        descriptor: AgentDescriptor,
    ) -> Result<Arc<AgentConnection>, RegistryError> {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if connections.contains_key(&descriptor.id) {
            warn!(agent_id = %descriptor.id, "Wrapper is already registered");
            return Err(RegistryError::DuplicateId(descriptor.id));
        }

        let id = descriptor.id.clone();
        info!(
            agent_id = %id,
            name = %descriptor.name,
            address = %descriptor.address,
            "Registered wrapper"
        );

        let connection = AgentConnection::new(descriptor, self.timings.clone(), self.dialer.clone());
        if let Some(handle) = connection.start() {
            self.tasks.register(id.clone(), handle);
        }
        connections.insert(id, connection.clone());

        Ok(connection)
    }

    /// Register every descriptor that carries a shared key.
    ///
    /// Agents without a key or with a duplicate id are skipped with a diagnostic.
    /// Returns the number of connections started.
    pub fn connect_all(&self, descriptors: impl IntoIterator<Item = AgentDescriptor>) -> usize {
        let mut started = 0;

        for descriptor in descriptors {
            if descriptor.shared_key.as_deref().map_or(true, str::is_empty) {
                warn!(agent_id = %descriptor.id, "Skipping wrapper without shared_key");
                continue;
            }

            match self.connect(descriptor) {
                Ok(_) => started += 1,
                Err(e) => error!("Failed to register wrapper: {}", e),
            }
        }

        started
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Snapshot of every registered connection, ordered by id
    pub fn list(&self) -> Vec<Arc<AgentConnection>> {
        let mut list: Vec<_> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id().cmp(b.id()));
        list
    }

    pub fn count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Shut down every connection and empty the registry. Does not wait for the
    /// manage tasks; see [`ConnectionRegistry::shutdown`] for that.
    pub fn disconnect_all(&self) -> usize {
        let drained: Vec<(String, Arc<AgentConnection>)> = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (id, connection) in &drained {
            let status = connection.status();
            connection.shutdown();
            info!(agent_id = %id, %status, "Disconnected wrapper");
        }

        drained.len()
    }

    /// Disconnect everything, then give the manage tasks up to `grace` to wind down.
    pub async fn shutdown(&self, grace: Duration) {
        let disconnected = self.disconnect_all();
        let aborted = self.tasks.join_all(grace).await;

        if aborted > 0 {
            warn!("{} connection task(s) aborted during shutdown", aborted);
        }
        info!("Connection registry shut down ({} connection(s))", disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcrelay_connection::{ConnectionStatus, DialError, DialRequest, Transport};
    use std::sync::Mutex;

    /// Routes dials by address: `ok` accepts, `denied` answers 401, anything else refuses
    struct AddressDialer {
        peers: Mutex<Vec<mcrelay_connection::transport::MemoryPeer>>,
    }

    impl AddressDialer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                peers: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Dialer for AddressDialer {
        async fn dial(&self, request: &DialRequest) -> Result<Transport, DialError> {
            if request.address.contains("ok") {
                let (transport, peer) = Transport::memory(8);
                self.peers.lock().unwrap().push(peer);
                Ok(transport)
            } else if request.address.contains("denied") {
                Err(DialError::Unauthorized)
            } else {
                Err(DialError::Connect("connection refused".to_string()))
            }
        }
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(AddressDialer::new(), ConnectionTimings::default())
    }

    fn agent(id: &str, host: &str) -> AgentDescriptor {
        AgentDescriptor::new(id, id.to_uppercase(), format!("ws://{}:8080/ws", host))
            .with_shared_key("k")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = registry();

        let first = registry.connect(agent("survival", "ok")).unwrap();
        let result = registry.connect(agent("survival", "elsewhere"));

        assert_eq!(
            result.unwrap_err(),
            RegistryError::DuplicateId("survival".to_string())
        );
        assert_eq!(registry.count(), 1);
        assert!(Arc::ptr_eq(&registry.get("survival").unwrap(), &first));
        assert_eq!(first.descriptor().address, "ws://ok:8080/ws");

        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let registry = registry();
        assert!(registry.get("missing").is_none());
        assert!(registry.list().is_empty());

        registry.connect(agent("zeta", "ok")).unwrap();
        registry.connect(agent("alpha", "ok")).unwrap();

        let ids: Vec<String> = registry.list().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(registry.get("alpha").is_some());

        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_new_connection_starts_connecting() {
        let registry = registry();
        let conn = registry.connect(agent("survival", "ok")).unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Connecting);

        settle().await;
        assert_eq!(conn.status(), ConnectionStatus::Connected);

        registry.shutdown(Duration::from_secs(1)).await;
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_all_skips_agents_without_key() {
        let registry = registry();

        let mut keyless = agent("creative", "ok");
        keyless.shared_key = None;
        let mut empty_key = agent("hardcore", "ok");
        empty_key.shared_key = Some(String::new());

        let started = registry.connect_all(vec![
            agent("survival", "ok"),
            keyless,
            empty_key,
            agent("survival", "ok"),
        ]);

        assert_eq!(started, 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.get("creative").is_none());

        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_disconnect_all_empty() {
        let registry = registry();
        assert_eq!(registry.disconnect_all(), 0);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_all_single_in_each_state() {
        for (host, expected) in [
            ("ok", ConnectionStatus::Connected),
            ("down", ConnectionStatus::Reconnecting),
            ("denied", ConnectionStatus::Error),
        ] {
            let registry = registry();
            let conn = registry.connect(agent("only", host)).unwrap();
            settle().await;
            assert_eq!(conn.status(), expected);

            assert_eq!(registry.disconnect_all(), 1);
            assert_eq!(registry.count(), 0);
            assert!(conn.is_closed());

            registry.shutdown(Duration::from_secs(1)).await;
            assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        }
    }

    #[tokio::test]
    async fn test_disconnect_all_many_mixed_states() {
        let registry = registry();
        let hosts = ["ok", "down", "denied", "ok", "down", "denied"];

        let conns: Vec<_> = hosts
            .iter()
            .enumerate()
            .map(|(i, host)| registry.connect(agent(&format!("w{}", i), host)).unwrap())
            .collect();
        settle().await;

        assert_eq!(registry.disconnect_all(), hosts.len());
        assert_eq!(registry.count(), 0);
        assert!(registry.list().is_empty());
        assert!(conns.iter().all(|c| c.is_closed()));

        registry.shutdown(Duration::from_secs(1)).await;
        assert!(conns
            .iter()
            .all(|c| c.status() == ConnectionStatus::Disconnected));

        // Calling it again is harmless
        assert_eq!(registry.disconnect_all(), 0);
    }
}
