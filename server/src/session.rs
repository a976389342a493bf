//! Session tokens and the table of connected players
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Issuing a random session id for every accepted connection
//! - Mapping transport peers to sessions in constant time
//! - Holding per-player lobby state (name, color, ready flags, game)
//!
//! A player only exists here between a successful connect (supported
//! protocol) and the matching disconnect.

use crate::game::GameId;
use crate::i18n::Locale;
use crate::transport::PeerId;
use log::warn;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use shared::{PlayerInfo, SessionId, LATEST_PROTOCOL};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A connected client and its lobby state
#[derive(Debug, Clone)]
pub struct Player {
    /// Token every packet from this client must carry
    pub sid: SessionId,
    /// Transport handle for replies
    pub peer: PeerId,
    /// Protocol announced at connect time
    pub protocol: u32,
    /// Client version reported when creating or joining a game
    pub version: i32,
    pub name: String,
    pub color: u32,
    /// Client-chosen unique id, distinct from the session id
    pub client_id: String,
    pub ready: bool,
    /// Set once the client finished loading a game in Prepare
    pub prepared: bool,
    pub game: Option<GameId>,
    pub locale: Locale,
    /// A fatal error was sent and the connection is closing
    pub disconnecting: bool,
}

impl Player {
    pub fn new(sid: SessionId, peer: PeerId, protocol: u32) -> Self {
        Self {
            sid,
            peer,
            protocol,
            version: -1,
            name: String::new(),
            color: 0,
            client_id: String::new(),
            ready: false,
            prepared: false,
            game: None,
            locale: Locale::default(),
            disconnecting: false,
        }
    }

    pub fn toggle_ready(&mut self) {
        self.ready = !self.ready;
    }

    pub fn uses_old_protocol(&self) -> bool {
        self.protocol < LATEST_PROTOCOL
    }

    /// Drops all per-game state.
    pub fn reset_game(&mut self) {
        self.game = None;
        self.ready = false;
        self.prepared = false;
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            sid: self.sid,
            name: self.name.clone(),
            color: self.color,
            client_id: self.client_id.clone(),
            version: self.version,
            ready: self.ready,
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Player(name={:?}, peer={}, sid={}, protocol={})",
            self.name, self.peer, self.sid, self.protocol
        )
    }
}

/// Source of session tokens.
///
/// Uses the operating system's secure random source. If that source fails
/// at startup, a time-seeded generator is used instead and a warning logged.
pub struct SessionIdGenerator {
    fallback: Option<StdRng>,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        let mut probe = [0u8; 1];
        match OsRng.try_fill_bytes(&mut probe) {
            Ok(()) => Self { fallback: None },
            Err(e) => {
                warn!(
                    "System doesn't provide a secure random source ({}), session ids are predictable",
                    e
                );
                Self::with_seed(fallback_seed())
            }
        }
    }

    /// Generator that never touches the secure source.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            fallback: Some(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn is_secure(&self) -> bool {
        self.fallback.is_none()
    }

    pub fn generate(&mut self) -> SessionId {
        let mut bytes = [0u8; SessionId::LEN];
        match &mut self.fallback {
            None => {
                if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
                    warn!("Secure random source failed ({}), switching to fallback", e);
                    let mut rng = StdRng::seed_from_u64(fallback_seed());
                    rng.fill_bytes(&mut bytes);
                    self.fallback = Some(rng);
                }
            }
            Some(rng) => rng.fill_bytes(&mut bytes),
        }
        SessionId(bytes)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_nanos() as u64;
    nanos ^ u64::from(std::process::id()).rotate_left(32)
}

/// Connected players indexed by session id and by transport peer
pub struct SessionRegistry {
    players: HashMap<SessionId, Player>,
    peers: HashMap<PeerId, SessionId>,
    generator: SessionIdGenerator,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_generator(SessionIdGenerator::new())
    }

    pub fn with_generator(generator: SessionIdGenerator) -> Self {
        Self {
            players: HashMap::new(),
            peers: HashMap::new(),
            generator,
        }
    }

    /// Returns a session id no connected player currently holds.
    pub fn generate_id(&mut self) -> SessionId {
        loop {
            let sid = self.generator.generate();
            if !self.players.contains_key(&sid) {
                return sid;
            }
        }
    }

    /// Registers a player whose protocol was accepted.
    pub fn admit(&mut self, player: Player) {
        self.peers.insert(player.peer, player.sid);
        self.players.insert(player.sid, player);
    }

    pub fn remove(&mut self, sid: &SessionId) -> Option<Player> {
        let player = self.players.remove(sid)?;
        self.peers.remove(&player.peer);
        Some(player)
    }

    pub fn get(&self, sid: &SessionId) -> Option<&Player> {
        self.players.get(sid)
    }

    pub fn get_mut(&mut self, sid: &SessionId) -> Option<&mut Player> {
        self.players.get_mut(sid)
    }

    pub fn sid_for_peer(&self, peer: PeerId) -> Option<SessionId> {
        self.peers.get(&peer).copied()
    }

    pub fn contains(&self, sid: &SessionId) -> bool {
        self.players.contains_key(sid)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
