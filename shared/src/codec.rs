//! Byte-level encoding of packets with size and protocol validation.

use crate::{ClientPacket, Opcode, ServerPacket, SessionId};
use bincode::{deserialize, serialize, Options};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet of {size} bytes exceeds the global limit of {max} bytes")]
    GlobalSizeExceeded { size: usize, max: usize },
    #[error("{opcode:?} packet of {size} bytes exceeds its limit of {max} bytes")]
    PacketTooLarge {
        opcode: Opcode,
        size: usize,
        max: usize,
    },
    #[error("{opcode:?} is not available on protocol {protocol}")]
    UnsupportedOpcode { opcode: Opcode, protocol: u32 },
    #[error("frame is shorter than a session id")]
    Truncated,
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),
}

impl CodecError {
    /// Soft errors are reported to the sender without dropping the connection.
    pub fn is_soft(&self) -> bool {
        matches!(self, CodecError::PacketTooLarge { .. })
    }
}

/// Wire options for client frames: the same layout as `bincode::serialize`,
/// but a frame must be consumed entirely.
fn client_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

pub fn encode_client(sid: &SessionId, packet: &ClientPacket) -> Result<Vec<u8>, CodecError> {
    Ok(serialize(&(sid, packet))?)
}

/// Parses a client frame for a peer speaking `protocol`.
///
/// The global ceiling is checked before anything is parsed; the per-opcode
/// ceiling once the opcode is known.
pub fn decode_client(
    data: &[u8],
    protocol: u32,
    max_packet_size: usize,
) -> Result<(SessionId, ClientPacket), CodecError> {
    if data.len() > max_packet_size {
        return Err(CodecError::GlobalSizeExceeded {
            size: data.len(),
            max: max_packet_size,
        });
    }

    let (sid, packet): (SessionId, ClientPacket) = client_options().deserialize(data)?;

    let opcode = packet.opcode();
    if opcode.min_protocol() > protocol {
        return Err(CodecError::UnsupportedOpcode { opcode, protocol });
    }
    if data.len() > opcode.max_size() {
        return Err(CodecError::PacketTooLarge {
            opcode,
            size: data.len(),
            max: opcode.max_size(),
        });
    }

    Ok((sid, packet))
}

/// Reads only the session id prefix of a frame.
pub fn peek_session(data: &[u8]) -> Result<SessionId, CodecError> {
    SessionId::from_slice(data).ok_or(CodecError::Truncated)
}

/// Builds a relay frame: the session id prefix followed by the raw payload.
pub fn encode_relay(sid: &SessionId, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(SessionId::LEN + payload.len());
    frame.extend_from_slice(sid.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Splits a relayed frame into the sender's session id and its payload.
pub fn decode_relay(data: &[u8]) -> Result<(SessionId, &[u8]), CodecError> {
    let sid = peek_session(data)?;
    Ok((sid, &data[SessionId::LEN..]))
}

pub fn encode_server(packet: &ServerPacket) -> Result<Vec<u8>, CodecError> {
    Ok(serialize(packet)?)
}

pub fn decode_server(data: &[u8]) -> Result<ServerPacket, CodecError> {
    Ok(deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CreateGame, ErrorKind, JoinGame, DEFAULT_MAX_PACKET_SIZE};
    use uuid::Uuid;

    fn sid() -> SessionId {
        SessionId([7; 16])
    }

    #[test]
    fn test_client_frame_starts_with_session_id() {
        let data = encode_client(&sid(), &ClientPacket::LeaveGame).unwrap();
        assert_eq!(&data[..SessionId::LEN], sid().as_bytes());
        assert_eq!(peek_session(&data).unwrap(), sid());
    }

    #[test]
    fn test_decode_join_game() {
        let join = JoinGame {
            uuid: Uuid::new_v4(),
            client_version: 3,
            client_id: "abc".to_string(),
            player_name: "Bob".to_string(),
            player_color: None,
            password: Some("x".to_string()),
        };
        let data = encode_client(&sid(), &ClientPacket::JoinGame(join.clone())).unwrap();

        let (decoded_sid, packet) = decode_client(&data, 1, DEFAULT_MAX_PACKET_SIZE).unwrap();
        assert_eq!(decoded_sid, sid());
        match packet {
            ClientPacket::JoinGame(decoded) => assert_eq!(decoded, join),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_global_limit_checked_before_parsing() {
        let garbage = vec![0xff; 64];
        let err = decode_client(&garbage, 1, 32).unwrap_err();
        assert!(matches!(
            err,
            CodecError::GlobalSizeExceeded { size: 64, max: 32 }
        ));
        assert!(!err.is_soft());
    }

    #[test]
    fn test_opcode_limit_is_soft() {
        let packet = ClientPacket::ChangeName {
            name: "n".repeat(2000),
        };
        let data = encode_client(&sid(), &packet).unwrap();

        let err = decode_client(&data, 1, DEFAULT_MAX_PACKET_SIZE).unwrap_err();
        match &err {
            CodecError::PacketTooLarge { opcode, size, max } => {
                assert_eq!(*opcode, Opcode::ChangeName);
                assert_eq!(*size, data.len());
                assert_eq!(*max, 1024);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_soft());
        assert!(err.to_string().contains(&data.len().to_string()));
    }

    #[test]
    fn test_malformed_payload_is_fatal() {
        let mut data = sid().as_bytes().to_vec();
        data.extend_from_slice(&[200, 0, 0, 0]);

        let err = decode_client(&data, 1, DEFAULT_MAX_PACKET_SIZE).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert!(!err.is_soft());
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let mut data = encode_client(&sid(), &ClientPacket::ToggleReady).unwrap();
        assert!(decode_client(&data, 1, DEFAULT_MAX_PACKET_SIZE).is_ok());

        data.extend_from_slice(b"junk");
        let err = decode_client(&data, 1, DEFAULT_MAX_PACKET_SIZE).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert!(!err.is_soft());
    }

    #[test]
    fn test_ready_toggle_rejected_on_protocol_zero() {
        let data = encode_client(&sid(), &ClientPacket::ToggleReady).unwrap();

        let err = decode_client(&data, 0, DEFAULT_MAX_PACKET_SIZE).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnsupportedOpcode {
                opcode: Opcode::ToggleReady,
                protocol: 0
            }
        ));
        assert!(decode_client(&data, 1, DEFAULT_MAX_PACKET_SIZE).is_ok());
    }

    #[test]
    fn test_create_game_within_limits() {
        let create = CreateGame {
            client_version: 1,
            client_id: "c1".to_string(),
            player_name: "Alice".to_string(),
            player_color: Some(4),
            map_name: "development".to_string(),
            max_players: 4,
            password: None,
            load: None,
        };
        let data = encode_client(&sid(), &ClientPacket::CreateGame(create)).unwrap();
        assert!(data.len() <= Opcode::CreateGame.max_size());
        assert!(decode_client(&data, 0, DEFAULT_MAX_PACKET_SIZE).is_ok());
    }

    #[test]
    fn test_relay_frame_split() {
        let frame = encode_relay(&sid(), b"tick 42");
        let (sender, payload) = decode_relay(&frame).unwrap();
        assert_eq!(sender, sid());
        assert_eq!(payload, b"tick 42");

        assert!(matches!(
            decode_relay(&frame[..4]),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_server_error_packet() {
        let packet = ServerPacket::Error {
            message: "Wrong password".to_string(),
            kind: ErrorKind::NotSet,
        };
        let data = encode_server(&packet).unwrap();
        assert_eq!(decode_server(&data).unwrap(), packet);
    }
}
