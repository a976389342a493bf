//! The server context: registries, handler table, localizer and the queue
//! of outgoing transport operations.
//!
//! The event loop owns exactly one [`ServerContext`] and passes it by
//! mutable reference into every handler, so all registry mutation happens on
//! one task. Handlers never touch sockets; they queue [`Outgoing`] operations
//! that the loop hands to the transport once the event is fully processed.

use crate::config::ServerConfig;
use crate::connection;
use crate::dispatch::{Event, Origin, Router};
use crate::error::LobbyError;
use crate::game::{GameId, GameRegistry};
use crate::i18n::{Locale, Localizer, Message};
use crate::lobby;
use crate::relay;
use crate::session::SessionRegistry;
use crate::transport::{NetEvent, PeerId};
use log::{debug, error, warn};
use shared::{encode_server, Capabilities, ErrorKind, ServerPacket, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Packet { peer: PeerId, data: Vec<u8> },
    /// Close the connection after all frames queued before it.
    Disconnect { peer: PeerId },
}

pub struct ServerContext {
    pub sessions: SessionRegistry,
    pub games: GameRegistry,
    pub router: Router,
    pub localizer: Localizer,
    capabilities: Capabilities,
    max_packet_size: usize,
    outbox: Vec<Outgoing>,
}

impl ServerContext {
    /// Context with the standard connection, lobby and relay handlers.
    pub fn new(config: &ServerConfig, localizer: Localizer) -> Self {
        let mut ctx = Self::without_handlers(config, localizer);
        connection::register_handlers(&mut ctx.router);
        lobby::register_handlers(&mut ctx.router);
        relay::register_handlers(&mut ctx.router);
        ctx
    }

    pub fn without_handlers(config: &ServerConfig, localizer: Localizer) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            games: GameRegistry::new(),
            router: Router::new(),
            localizer,
            capabilities: config.capabilities(),
            max_packet_size: config.max_packet_size,
            outbox: Vec::new(),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Feeds one transport event through the router.
    pub fn dispatch(&mut self, event: NetEvent) -> bool {
        match event {
            NetEvent::None => true,
            NetEvent::Connect { peer, protocol } => self.fire(Event::Connect { peer, protocol }),
            NetEvent::Disconnect { peer } => self.fire(Event::Disconnect { peer }),
            NetEvent::Receive { peer, frame } => self.fire(Event::Receive { peer, frame }),
        }
    }

    /// Runs every handler registered for the event, in order.
    ///
    /// A failing handler does not stop the chain: its error is reported to
    /// whoever caused the event and it counts as `false`. The returned AND of
    /// all results is informational.
    pub fn fire(&mut self, event: Event) -> bool {
        let handlers = self.router.handlers(event.key());
        let mut all_handled = true;

        for handler in handlers {
            let handled = match handler(self, &event) {
                Ok(handled) => handled,
                Err(error) => {
                    self.report(&event, error);
                    false
                }
            };
            all_handled &= handled;
        }

        all_handled
    }

    fn report(&mut self, event: &Event, error: LobbyError) {
        let target = match event.origin() {
            Origin::Session(sid) => Some(sid),
            Origin::Peer(peer) => self.sessions.sid_for_peer(peer),
            Origin::Server => None,
        };
        let Some(sid) = target else {
            warn!("Dropping error for {:?} without a player: {}", event.key(), error);
            return;
        };
        debug!(
            "{:?} failed for {} (fatal={}): {}",
            event.key(),
            sid,
            error.is_fatal(),
            error
        );

        match error {
            LobbyError::Soft(message) => self.error(&sid, &message, ErrorKind::NotSet),
            LobbyError::Fatal(message) => self.fatal_error(&sid, &message),
        }
    }

    /// Drains the queued transport operations.
    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn send(&mut self, peer: PeerId, packet: &ServerPacket) {
        match encode_server(packet) {
            Ok(data) => self.send_raw(peer, data),
            Err(e) => error!("Failed to encode packet for {}: {}", peer, e),
        }
    }

    pub fn send_raw(&mut self, peer: PeerId, data: Vec<u8>) {
        self.outbox.push(Outgoing::Packet { peer, data });
    }

    /// Sends to a player unless it is already being disconnected.
    pub fn send_to(&mut self, sid: &SessionId, packet: &ServerPacket) {
        if let Some(player) = self.sessions.get(sid) {
            if !player.disconnecting {
                let peer = player.peer;
                self.send(peer, packet);
            }
        }
    }

    /// Sends the same packet to every member of a game.
    pub fn broadcast(&mut self, game: &GameId, packet: &ServerPacket) {
        let Some(members) = self.games.get(game).map(|g| g.players.clone()) else {
            return;
        };
        let data = match encode_server(packet) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode broadcast for game {}: {}", game, e);
                return;
            }
        };

        for sid in members {
            if let Some(player) = self.sessions.get(&sid) {
                if !player.disconnecting {
                    let peer = player.peer;
                    self.send_raw(peer, data.clone());
                }
            }
        }
    }

    /// Sends the current membership view of a game to all its members.
    pub fn broadcast_snapshot(&mut self, game: &GameId) {
        let Some(snapshot) = self.games.get(game).map(|g| g.snapshot(&self.sessions)) else {
            return;
        };
        self.broadcast(game, &ServerPacket::GameState(snapshot));
    }

    /// Soft error: the player stays connected.
    pub fn error(&mut self, sid: &SessionId, message: &Message, kind: ErrorKind) {
        let Some(player) = self.sessions.get(sid) else {
            return;
        };
        let text = self.localizer.render(&player.locale, message);
        self.send_to(sid, &ServerPacket::Error { message: text, kind });
    }

    /// Fatal error: the player is told why and then disconnected.
    pub fn fatal_error(&mut self, sid: &SessionId, message: &Message) {
        let Some(player) = self.sessions.get_mut(sid) else {
            return;
        };
        if player.disconnecting {
            return;
        }
        player.disconnecting = true;
        let peer = player.peer;
        let text = self.localizer.render(&player.locale, message);
        self.send(peer, &ServerPacket::FatalError { message: text });
        self.disconnect(peer);
    }

    /// Fatal error for a peer that has no player record.
    pub fn peer_fatal_error(&mut self, peer: PeerId, message: &Message) {
        let text = self.localizer.render(&Locale::default(), message);
        self.send(peer, &ServerPacket::FatalError { message: text });
        self.disconnect(peer);
    }

    pub fn disconnect(&mut self, peer: PeerId) {
        self.outbox.push(Outgoing::Disconnect { peer });
    }
}
