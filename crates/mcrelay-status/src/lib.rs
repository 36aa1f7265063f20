//! Game server status probes
//!
//! Bedrock servers answer a RakNet "unconnected ping" on their game port without a
//! session, which is enough to read the server name, version and player counts.

pub mod raknet;

use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::debug;

/// Status reported by a game server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub edition: String,
    pub server_name: String,
    pub protocol_version: i64,
    pub version_name: String,
    pub player_count: i64,
    pub max_player_count: i64,
    pub server_id: String,
    pub level_name: String,
    pub game_mode: String,
    pub game_mode_id: i64,
    pub ipv4_port: u16,
    pub ipv6_port: u16,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("error pinging {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error pinging {0}: no reply")]
    Timeout(String),

    #[error("error pinging {address}: {source}")]
    Codec {
        address: String,
        #[source]
        source: raknet::CodecError,
    },
}

/// Queries a game server for its status
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<ServerStatus, ProbeError>;
}

/// RakNet unconnected-ping probe
#[derive(Debug, Clone)]
pub struct RakNetProbe {
    timeout: Duration,
    guid: i64,
}

impl Default for RakNetProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl RakNetProbe {
    pub fn new(timeout: Duration) -> Self {
        let (high, _) = uuid::Uuid::new_v4().as_u64_pair();
        Self {
            timeout,
            guid: high as i64,
        }
    }

    async fn ping(&self, address: &str) -> Result<raknet::Pong, ProbeError> {
        let io = |source: std::io::Error| ProbeError::Io {
            address: address.to_string(),
            source,
        };

        let target = tokio::net::lookup_host(address)
            .await
            .map_err(io)?
            .next()
            .ok_or_else(|| {
                io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "address did not resolve",
                ))
            })?;

        // The local socket must match the target's address family.
        let local: SocketAddr = if target.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await.map_err(io)?;
        socket.connect(target).await.map_err(io)?;

        let ping = raknet::encode_ping(elapsed_millis(), self.guid);
        socket.send(&ping).await.map_err(io)?;

        let mut buf = vec![0u8; 1500];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ProbeError::Timeout(address.to_string()))?
            .map_err(io)?;

        raknet::decode_pong(&buf[..len]).map_err(|source| ProbeError::Codec {
            address: address.to_string(),
            source,
        })
    }
}

#[async_trait]
impl StatusProbe for RakNetProbe {
    async fn probe(&self, address: &str) -> Result<ServerStatus, ProbeError> {
        let pong = self.ping(address).await?;
        debug!("Pong from {}: {}", address, pong.motd);

        raknet::parse_motd(&pong.motd).map_err(|source| ProbeError::Codec {
            address: address.to_string(),
            source,
        })
    }
}

/// Milliseconds since the first ping of this process
fn elapsed_millis() -> i64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as i64
}
