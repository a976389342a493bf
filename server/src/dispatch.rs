//! Event keys, events and the handler table.
//!
//! Every transport event, every client packet and a handful of internal
//! lobby events (prepare, start, leave, delete, terminate, relay) are fired
//! through the [`Router`]. Each key owns an ordered chain of handlers; firing
//! runs the whole chain, see [`ServerContext::fire`].

use crate::context::ServerContext;
use crate::error::LobbyError;
use crate::game::GameId;
use crate::transport::{Frame, PeerId};
use shared::{ClientPacket, Opcode, SessionId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    Connect,
    Disconnect,
    Receive,
    Packet(Opcode),
    PrepareGame,
    StartGame,
    LeaveGame,
    DeleteGame,
    TerminateGame,
    GameData,
}

#[derive(Debug, Clone)]
pub enum Event {
    Connect {
        peer: PeerId,
        protocol: u32,
    },
    Disconnect {
        peer: PeerId,
    },
    Receive {
        peer: PeerId,
        frame: Frame,
    },
    Packet {
        sid: SessionId,
        packet: ClientPacket,
    },
    PrepareGame {
        game: GameId,
    },
    StartGame {
        game: GameId,
    },
    LeaveGame {
        sid: SessionId,
    },
    DeleteGame {
        game: GameId,
    },
    TerminateGame {
        game: GameId,
        by: Option<SessionId>,
    },
    /// Raw relay frame from a member of a running game.
    GameData {
        sid: SessionId,
        data: Vec<u8>,
    },
}

/// Who caused an event, i.e. who receives errors raised while handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Peer(PeerId),
    Session(SessionId),
    Server,
}

impl Event {
    pub fn key(&self) -> EventKey {
        match self {
            Event::Connect { .. } => EventKey::Connect,
            Event::Disconnect { .. } => EventKey::Disconnect,
            Event::Receive { .. } => EventKey::Receive,
            Event::Packet { packet, .. } => EventKey::Packet(packet.opcode()),
            Event::PrepareGame { .. } => EventKey::PrepareGame,
            Event::StartGame { .. } => EventKey::StartGame,
            Event::LeaveGame { .. } => EventKey::LeaveGame,
            Event::DeleteGame { .. } => EventKey::DeleteGame,
            Event::TerminateGame { .. } => EventKey::TerminateGame,
            Event::GameData { .. } => EventKey::GameData,
        }
    }

    pub fn origin(&self) -> Origin {
        match self {
            Event::Connect { peer, .. }
            | Event::Disconnect { peer }
            | Event::Receive { peer, .. } => Origin::Peer(*peer),
            Event::Packet { sid, .. } | Event::LeaveGame { sid } | Event::GameData { sid, .. } => {
                Origin::Session(*sid)
            }
            Event::PrepareGame { .. }
            | Event::StartGame { .. }
            | Event::DeleteGame { .. }
            | Event::TerminateGame { .. } => Origin::Server,
        }
    }
}

/// `Ok(false)` marks an event the handler declined or only partly handled.
pub type HandlerResult = Result<bool, LobbyError>;

pub type Handler = Arc<dyn Fn(&mut ServerContext, &Event) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Runs before every handler registered so far.
    First,
    #[default]
    Last,
}

#[derive(Default)]
pub struct Router {
    table: HashMap<EventKey, Vec<Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: EventKey, priority: Priority, handler: F)
    where
        F: Fn(&mut ServerContext, &Event) -> HandlerResult + Send + Sync + 'static,
    {
        let chain = self.table.entry(key).or_default();
        let handler: Handler = Arc::new(handler);
        match priority {
            Priority::First => chain.insert(0, handler),
            Priority::Last => chain.push(handler),
        }
    }

    /// Snapshot of the chain for `key`, so handlers may register or fire
    /// further events while it runs.
    pub fn handlers(&self, key: EventKey) -> Vec<Handler> {
        self.table.get(&key).cloned().unwrap_or_default()
    }

    pub fn handler_count(&self, key: EventKey) -> usize {
        self.table.get(&key).map_or(0, Vec::len)
    }

    pub fn is_registered(&self, key: EventKey) -> bool {
        self.handler_count(key) > 0
    }
}
