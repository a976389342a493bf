//! Wire protocol shared between the lobby server and its clients.
//!
//! Every frame a client sends carries the session id the server issued at
//! connect time followed by a [`ClientPacket`]. The server answers with
//! [`ServerPacket`]s. Once a game is running, members exchange opaque relay
//! frames that only share the session id prefix with regular packets.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod codec;

pub use codec::{
    decode_client, decode_relay, decode_server, encode_client, encode_relay, encode_server,
    peek_session, CodecError,
};

/// Protocol versions accepted at connect time, oldest first.
///
/// Protocol 0 predates the ready toggle and kicking; those opcodes are
/// rejected for peers that advertise it.
pub const PROTOCOLS: [u32; 2] = [0, 1];

/// Newest protocol version; anything below counts as an old protocol.
pub const LATEST_PROTOCOL: u32 = PROTOCOLS[PROTOCOLS.len() - 1];

pub const DEFAULT_MAX_PACKET_SIZE: usize = 2 * 1024 * 1024;

pub const DEFAULT_MIN_PLAYERS: u32 = 2;
pub const DEFAULT_MAX_PLAYERS: u32 = 8;

/// Server-issued session token. Always encoded as 16 raw bytes at the very
/// start of a client frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    pub const LEN: usize = 16;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::LEN] = bytes.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self)
    }
}

pub type GameId = Uuid;

/// Limits advertised to a client together with its session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub min_players: u32,
    pub max_players: u32,
    pub max_packet_size: u64,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            min_players: DEFAULT_MIN_PLAYERS,
            max_players: DEFAULT_MAX_PLAYERS,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotSet,
    /// The game the player was in no longer exists.
    TerminateGame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    Open,
    Prepare,
    Running,
}

/// A lobby member as seen by the other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub sid: SessionId,
    pub name: String,
    pub color: u32,
    pub client_id: String,
    pub version: i32,
    pub ready: bool,
}

/// Full membership view of one game, sent whenever membership changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub uuid: GameId,
    pub creator: SessionId,
    pub map_name: String,
    pub min_players: u32,
    pub max_players: u32,
    pub has_password: bool,
    pub load: Option<String>,
    pub state: GameState,
    /// Members in join order.
    pub players: Vec<PlayerInfo>,
}

/// One entry of a game listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub uuid: GameId,
    pub creator_name: String,
    pub map_name: String,
    pub version: i32,
    pub player_count: u32,
    pub max_players: u32,
    pub has_password: bool,
    pub load: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGame {
    pub client_version: i32,
    pub client_id: String,
    pub player_name: String,
    pub player_color: Option<u32>,
    pub map_name: String,
    pub max_players: u32,
    pub password: Option<String>,
    /// Savegame to load instead of a fresh map.
    pub load: Option<String>,
}

/// Listing filters; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListGames {
    pub client_version: Option<i32>,
    pub map_name: Option<String>,
    pub max_players: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinGame {
    pub uuid: GameId,
    pub client_version: i32,
    pub client_id: String,
    pub player_name: String,
    /// `None` lets the server pick the lowest free color.
    pub player_color: Option<u32>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientPacket {
    Error { message: String },
    FatalError { message: String },
    SessionProps { language: String },
    CreateGame(CreateGame),
    ListGames(ListGames),
    JoinGame(JoinGame),
    LeaveGame,
    ChatMsg { message: String },
    ChangeName { name: String },
    ChangeColor { color: u32 },
    PreparedGame,
    ToggleReady,
    KickPlayer { sid: SessionId },
}

impl ClientPacket {
    pub fn opcode(&self) -> Opcode {
        match self {
            ClientPacket::Error { .. } => Opcode::Error,
            ClientPacket::FatalError { .. } => Opcode::FatalError,
            ClientPacket::SessionProps { .. } => Opcode::SessionProps,
            ClientPacket::CreateGame(_) => Opcode::CreateGame,
            ClientPacket::ListGames(_) => Opcode::ListGames,
            ClientPacket::JoinGame(_) => Opcode::JoinGame,
            ClientPacket::LeaveGame => Opcode::LeaveGame,
            ClientPacket::ChatMsg { .. } => Opcode::ChatMsg,
            ClientPacket::ChangeName { .. } => Opcode::ChangeName,
            ClientPacket::ChangeColor { .. } => Opcode::ChangeColor,
            ClientPacket::PreparedGame => Opcode::PreparedGame,
            ClientPacket::ToggleReady => Opcode::ToggleReady,
            ClientPacket::KickPlayer { .. } => Opcode::KickPlayer,
        }
    }
}

/// Class identity of a client packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Error,
    FatalError,
    SessionProps,
    CreateGame,
    ListGames,
    JoinGame,
    LeaveGame,
    ChatMsg,
    ChangeName,
    ChangeColor,
    PreparedGame,
    ToggleReady,
    KickPlayer,
}

impl Opcode {
    pub const ALL: [Opcode; 13] = [
        Opcode::Error,
        Opcode::FatalError,
        Opcode::SessionProps,
        Opcode::CreateGame,
        Opcode::ListGames,
        Opcode::JoinGame,
        Opcode::LeaveGame,
        Opcode::ChatMsg,
        Opcode::ChangeName,
        Opcode::ChangeColor,
        Opcode::PreparedGame,
        Opcode::ToggleReady,
        Opcode::KickPlayer,
    ];

    /// Oldest protocol that knows this opcode.
    pub fn min_protocol(self) -> u32 {
        match self {
            Opcode::ToggleReady | Opcode::KickPlayer => 1,
            _ => 0,
        }
    }

    /// Per-opcode size ceiling in bytes, including the session id prefix.
    pub fn max_size(self) -> usize {
        match self {
            Opcode::ChatMsg => 64 * 1024,
            Opcode::Error | Opcode::FatalError | Opcode::CreateGame | Opcode::JoinGame => 4 * 1024,
            _ => 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerPacket {
    Session {
        sid: SessionId,
        capabilities: Capabilities,
    },
    Ok,
    Error {
        message: String,
        kind: ErrorKind,
    },
    FatalError {
        message: String,
    },
    GameState(GameSnapshot),
    GamesList(Vec<GameSummary>),
    PrepareGame,
    StartGame,
    ChatMsg {
        name: String,
        message: String,
    },
    KickPlayer(PlayerInfo),
}
