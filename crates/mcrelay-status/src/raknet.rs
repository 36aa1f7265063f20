//! RakNet unconnected ping/pong codec
//!
//! Ping: `[0x01][time: i64][magic: 16 bytes][client guid: i64]`
//!
//! Pong: `[0x1c][time: i64][server guid: i64][magic: 16 bytes][len: u16][motd: len bytes]`
//!
//! The MOTD is a `;`-separated list:
//! `edition;name;protocol;version;players;max;serverId;level;gameMode;gameModeId;v4port;v6port`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::ServerStatus;

pub const UNCONNECTED_PING: u8 = 0x01;
pub const UNCONNECTED_PONG: u8 = 0x1c;

/// Offline message marker
pub const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

/// Fields up to and including the max player count must be present
const MIN_MOTD_FIELDS: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected packet id 0x{0:02x}")]
    UnexpectedPacket(u8),

    #[error("Incomplete packet")]
    IncompletePacket,

    #[error("Bad offline message magic")]
    BadMagic,

    #[error("Malformed MOTD: {0}")]
    MalformedMotd(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub time: i64,
    pub server_guid: i64,
    pub motd: String,
}

pub fn encode_ping(time: i64, client_guid: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 8 + MAGIC.len() + 8);
    buf.put_u8(UNCONNECTED_PING);
    buf.put_i64(time);
    buf.put_slice(&MAGIC);
    buf.put_i64(client_guid);
    buf.freeze()
}

pub fn encode_pong(time: i64, server_guid: i64, motd: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 8 + 8 + MAGIC.len() + 2 + motd.len());
    buf.put_u8(UNCONNECTED_PONG);
    buf.put_i64(time);
    buf.put_i64(server_guid);
    buf.put_slice(&MAGIC);
    buf.put_u16(motd.len() as u16);
    buf.put_slice(motd.as_bytes());
    buf.freeze()
}

pub fn decode_pong(mut buf: &[u8]) -> Result<Pong, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::IncompletePacket);
    }
    let id = buf.get_u8();
    if id != UNCONNECTED_PONG {
        return Err(CodecError::UnexpectedPacket(id));
    }

    if buf.remaining() < 8 + 8 + MAGIC.len() + 2 {
        return Err(CodecError::IncompletePacket);
    }
    let time = buf.get_i64();
    let server_guid = buf.get_i64();

    if buf[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    buf.advance(MAGIC.len());

    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(CodecError::IncompletePacket);
    }
    let motd = String::from_utf8_lossy(&buf[..len]).into_owned();

    Ok(Pong {
        time,
        server_guid,
        motd,
    })
}

/// Split a MOTD into a [`ServerStatus`]. Unparseable numbers read as zero.
pub fn parse_motd(motd: &str) -> Result<ServerStatus, CodecError> {
    let fields: Vec<&str> = motd.split(';').collect();
    if fields.len() < MIN_MOTD_FIELDS {
        return Err(CodecError::MalformedMotd(format!(
            "expected at least {} fields, got {}",
            MIN_MOTD_FIELDS,
            fields.len()
        )));
    }

    let text = |i: usize| fields.get(i).copied().unwrap_or_default().to_string();
    let number = |i: usize| {
        fields
            .get(i)
            .and_then(|f| f.trim().parse::<i64>().ok())
            .unwrap_or(0)
    };

    Ok(ServerStatus {
        edition: text(0),
        server_name: text(1),
        protocol_version: number(2),
        version_name: text(3),
        player_count: number(4),
        max_player_count: number(5),
        server_id: text(6),
        level_name: text(7),
        game_mode: text(8),
        game_mode_id: number(9),
        ipv4_port: number(10) as u16,
        ipv6_port: number(11) as u16,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOTD: &str =
        "MCPE;Dedicated Server;712;1.21.20;3;10;13253860892328930865;Bedrock level;Survival;1;19132;19133;";

    #[test]
    fn test_ping_layout() {
        let ping = encode_ping(42, -7);
        assert_eq!(ping.len(), 33);
        assert_eq!(ping[0], UNCONNECTED_PING);
        assert_eq!(&ping[1..9], &42i64.to_be_bytes());
        assert_eq!(&ping[9..25], &MAGIC);
        assert_eq!(&ping[25..33], &(-7i64).to_be_bytes());
    }

    #[test]
    fn test_decode_pong() {
        let packet = encode_pong(42, 99, MOTD);
        let pong = decode_pong(&packet).unwrap();
        assert_eq!(pong.time, 42);
        assert_eq!(pong.server_guid, 99);
        assert_eq!(pong.motd, MOTD);
    }

    #[test]
    fn test_decode_rejects_bad_packets() {
        assert_eq!(decode_pong(&[]), Err(CodecError::IncompletePacket));
        assert_eq!(decode_pong(&[0x05]), Err(CodecError::UnexpectedPacket(0x05)));

        let packet = encode_pong(1, 2, MOTD);
        assert_eq!(
            decode_pong(&packet[..packet.len() - 5]),
            Err(CodecError::IncompletePacket)
        );

        let mut corrupted = packet.to_vec();
        corrupted[17] = 0xaa;
        assert_eq!(decode_pong(&corrupted), Err(CodecError::BadMagic));
    }

    #[test]
    fn test_parse_motd() {
        let status = parse_motd(MOTD).unwrap();
        assert_eq!(status.edition, "MCPE");
        assert_eq!(status.server_name, "Dedicated Server");
        assert_eq!(status.protocol_version, 712);
        assert_eq!(status.version_name, "1.21.20");
        assert_eq!(status.player_count, 3);
        assert_eq!(status.max_player_count, 10);
        assert_eq!(status.level_name, "Bedrock level");
        assert_eq!(status.game_mode, "Survival");
        assert_eq!(status.game_mode_id, 1);
        assert_eq!(status.ipv4_port, 19132);
        assert_eq!(status.ipv6_port, 19133);
    }

    #[test]
    fn test_parse_short_motd() {
        let status = parse_motd("MCPE;Lobby;712;1.21.20;x;20").unwrap();
        assert_eq!(status.player_count, 0);
        assert_eq!(status.max_player_count, 20);
        assert_eq!(status.level_name, "");

        assert!(matches!(
            parse_motd("MCPE;Lobby"),
            Err(CodecError::MalformedMotd(_))
        ));
    }
}
