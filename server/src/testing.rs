//! In-process client harness for handler tests.
//!
//! Drives a [`ServerContext`] with the same events the transport would
//! produce and collects everything the handlers queue per peer.

use crate::config::ServerConfig;
use crate::context::{Outgoing, ServerContext};
use crate::game::GameId;
use crate::i18n::Localizer;
use crate::transport::{Frame, NetEvent, PeerId};
use shared::{
    decode_server, encode_client, ClientPacket, CreateGame, JoinGame, ServerPacket, SessionId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Client {
    pub peer: PeerId,
    pub sid: SessionId,
}

pub struct Harness {
    pub ctx: ServerContext,
    next_peer: u32,
    outbox: Vec<Outgoing>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_context(ServerContext::new(&ServerConfig::default(), Localizer::new()))
    }

    pub fn with_context(ctx: ServerContext) -> Self {
        Self {
            ctx,
            next_peer: 1,
            outbox: Vec::new(),
        }
    }

    pub fn connect(&mut self, protocol: u32) -> Client {
        let peer = PeerId(self.next_peer);
        self.next_peer += 1;
        self.ctx.dispatch(NetEvent::Connect { peer, protocol });
        self.collect();

        let client = Client {
            peer,
            sid: SessionId([0; 16]),
        };
        match self.received(&client).as_slice() {
            [ServerPacket::Session { sid, .. }] => Client { peer, sid: *sid },
            other => panic!("expected a session packet, got {other:?}"),
        }
    }

    pub fn send(&mut self, client: &Client, packet: ClientPacket) {
        let data = encode_client(&client.sid, &packet).unwrap();
        self.send_raw(client, data);
    }

    pub fn send_raw(&mut self, client: &Client, data: Vec<u8>) {
        self.ctx.dispatch(NetEvent::Receive {
            peer: client.peer,
            frame: Frame::Data(data),
        });
        self.collect();
    }

    pub fn disconnect(&mut self, client: &Client) {
        self.ctx.dispatch(NetEvent::Disconnect { peer: client.peer });
        self.collect();
    }

    fn collect(&mut self) {
        self.outbox.extend(self.ctx.take_outbox());
    }

    /// Drains the raw frames queued for `client`.
    pub fn frames(&mut self, client: &Client) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        self.outbox.retain(|out| match out {
            Outgoing::Packet { peer, data } if *peer == client.peer => {
                frames.push(data.clone());
                false
            }
            _ => true,
        });
        frames
    }

    /// Drains and decodes the packets queued for `client`.
    pub fn received(&mut self, client: &Client) -> Vec<ServerPacket> {
        self.frames(client)
            .iter()
            .map(|data| decode_server(data).unwrap())
            .collect()
    }

    pub fn was_disconnected(&self, client: &Client) -> bool {
        self.outbox
            .contains(&Outgoing::Disconnect { peer: client.peer })
    }

    pub fn clear(&mut self) {
        self.outbox.clear();
    }

    /// Creates a game and returns its id, draining the creator's snapshot.
    pub fn create(&mut self, client: &Client, request: CreateGame) -> GameId {
        self.send(client, ClientPacket::CreateGame(request));
        match self.received(client).as_slice() {
            [ServerPacket::GameState(snapshot)] => snapshot.uuid,
            other => panic!("expected a game snapshot, got {other:?}"),
        }
    }

    pub fn game_of(&self, client: &Client) -> Option<GameId> {
        self.ctx.sessions.get(&client.sid).and_then(|player| player.game)
    }

    pub fn members(&self, game: &GameId) -> Vec<SessionId> {
        self.ctx
            .games
            .get(game)
            .map(|game| game.players.clone())
            .unwrap_or_default()
    }
}

pub fn create_request(name: &str, max_players: u32) -> CreateGame {
    CreateGame {
        client_version: 1,
        client_id: format!("{name}-id"),
        player_name: name.to_string(),
        player_color: None,
        map_name: "development".to_string(),
        max_players,
        password: None,
        load: None,
    }
}

pub fn join_request(game: GameId, name: &str) -> JoinGame {
    JoinGame {
        uuid: game,
        client_version: 1,
        client_id: format!("{name}-id"),
        player_name: name.to_string(),
        player_color: None,
        password: None,
    }
}
