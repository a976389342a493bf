use crate::session::{Player, SessionRegistry};
use log::info;
use shared::{CreateGame, GameSnapshot, GameState, GameSummary, ListGames, SessionId};
use uuid::Uuid;

pub use shared::GameId;

/// One lobby and, once started, the running game it turned into.
#[derive(Debug, Clone)]
pub struct Game {
    pub uuid: GameId,
    pub creator: SessionId,
    pub creator_protocol: u32,
    pub creator_version: i32,
    /// Members in join order; the creator is always first.
    pub players: Vec<SessionId>,
    pub min_players: u32,
    pub max_players: u32,
    pub password: Option<String>,
    pub map_name: String,
    pub load: Option<String>,
    pub state: GameState,
}

impl Game {
    /// Creates an Open game with `creator` as its only member.
    pub fn new(creator: &Player, request: &CreateGame, min_players: u32) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            creator: creator.sid,
            creator_protocol: creator.protocol,
            creator_version: request.client_version,
            players: vec![creator.sid],
            min_players,
            max_players: request.max_players,
            password: request.password.clone().filter(|p| !p.is_empty()),
            map_name: request.map_name.clone(),
            load: request.load.clone(),
            state: GameState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == GameState::Open
    }

    pub fn is_running(&self) -> bool {
        self.state == GameState::Running
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players as usize
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn contains(&self, sid: &SessionId) -> bool {
        self.players.contains(sid)
    }

    pub fn add_player(&mut self, sid: SessionId) -> bool {
        if self.is_full() || self.contains(&sid) {
            return false;
        }
        self.players.push(sid);
        true
    }

    pub fn remove_player(&mut self, sid: &SessionId) -> bool {
        let before = self.players.len();
        self.players.retain(|member| member != sid);
        self.players.len() != before
    }

    pub fn members<'a>(
        &'a self,
        sessions: &'a SessionRegistry,
    ) -> impl Iterator<Item = &'a Player> {
        self.players.iter().filter_map(|sid| sessions.get(sid))
    }

    /// Smallest positive color no member uses.
    pub fn free_color(&self, sessions: &SessionRegistry) -> u32 {
        lowest_free_color(self.members(sessions).map(|player| player.color))
    }

    /// Every member is ready and enough players are present to start.
    pub fn is_ready(&self, sessions: &SessionRegistry) -> bool {
        self.players.len() >= self.min_players as usize
            && self.members(sessions).all(|player| player.ready)
    }

    pub fn all_prepared(&self, sessions: &SessionRegistry) -> bool {
        !self.players.is_empty() && self.members(sessions).all(|player| player.prepared)
    }

    pub fn snapshot(&self, sessions: &SessionRegistry) -> GameSnapshot {
        GameSnapshot {
            uuid: self.uuid,
            creator: self.creator,
            map_name: self.map_name.clone(),
            min_players: self.min_players,
            max_players: self.max_players,
            has_password: self.has_password(),
            load: self.load.clone(),
            state: self.state,
            players: self.members(sessions).map(Player::info).collect(),
        }
    }

    pub fn summary(&self, sessions: &SessionRegistry) -> GameSummary {
        GameSummary {
            uuid: self.uuid,
            creator_name: sessions
                .get(&self.creator)
                .map(|player| player.name.clone())
                .unwrap_or_default(),
            map_name: self.map_name.clone(),
            version: self.creator_version,
            player_count: self.players.len() as u32,
            max_players: self.max_players,
            has_password: self.has_password(),
            load: self.load.clone(),
        }
    }
}

pub fn lowest_free_color(used: impl IntoIterator<Item = u32>) -> u32 {
    let mut used: Vec<u32> = used.into_iter().collect();
    used.sort_unstable();
    used.dedup();

    let mut candidate = 1;
    for color in used {
        if color == candidate {
            candidate += 1;
        } else if color > candidate {
            break;
        }
    }
    candidate
}

/// All games known to the server, in creation order.
#[derive(Debug, Default)]
pub struct GameRegistry {
    games: Vec<Game>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, game: Game) -> GameId {
        let uuid = game.uuid;
        info!("Added game {} on map '{}'", uuid, game.map_name);
        self.games.push(game);
        uuid
    }

    pub fn remove(&mut self, uuid: &GameId) -> Option<Game> {
        let index = self.games.iter().position(|game| &game.uuid == uuid)?;
        info!("Removed game {}", uuid);
        Some(self.games.remove(index))
    }

    pub fn get(&self, uuid: &GameId) -> Option<&Game> {
        self.games.iter().find(|game| &game.uuid == uuid)
    }

    pub fn get_mut(&mut self, uuid: &GameId) -> Option<&mut Game> {
        self.games.iter_mut().find(|game| &game.uuid == uuid)
    }

    /// Finds a game by id that was created by the same client version.
    pub fn find(&self, uuid: &GameId, client_version: i32) -> Option<&Game> {
        self.get(uuid)
            .filter(|game| game.creator_version == client_version)
    }

    /// Games a player on `protocol` could join, narrowed by `filter`.
    pub fn joinable<'a>(
        &'a self,
        protocol: u32,
        filter: &'a ListGames,
    ) -> impl Iterator<Item = &'a Game> {
        self.games.iter().filter(move |game| {
            game.creator_protocol == protocol
                && game.is_open()
                && !game.is_full()
                && filter
                    .client_version
                    .map_or(true, |version| version == game.creator_version)
                && filter
                    .map_name
                    .as_deref()
                    .map_or(true, |map| map.is_empty() || map == game.map_name)
                && filter
                    .max_players
                    .map_or(true, |max| max == 0 || max == game.max_players)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Game> {
        self.games.iter()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
