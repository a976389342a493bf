//! Lobby state machine: creating, listing, joining and leaving games, and the
//! Open -> Prepare -> Running progression.
//!
//! Client packets arrive as [`Event::Packet`]; the transitions that several
//! packets share (leave, terminate, delete, prepare, start) are internal
//! events so that other handlers can hook into them.

use crate::context::ServerContext;
use crate::dispatch::{Event, EventKey, HandlerResult, Priority, Router};
use crate::error::LobbyError;
use crate::game::{Game, GameId};
use crate::i18n::Message;
use log::{debug, info};
use shared::{
    ClientPacket, CreateGame, ErrorKind, GameState, GameSummary, JoinGame, ListGames, Opcode,
    ServerPacket, SessionId,
};

/// Registers the lobby packet handlers and the internal transition handlers
pub fn register_handlers(router: &mut Router) {
    let packets: [(Opcode, fn(&mut ServerContext, &Event) -> HandlerResult); 10] = [
        (Opcode::CreateGame, on_create_game),
        (Opcode::ListGames, on_list_games),
        (Opcode::JoinGame, on_join_game),
        (Opcode::LeaveGame, on_leave_game),
        (Opcode::ChatMsg, on_chat),
        (Opcode::ChangeName, on_change_name),
        (Opcode::ChangeColor, on_change_color),
        (Opcode::ToggleReady, on_toggle_ready),
        (Opcode::PreparedGame, on_prepared_game),
        (Opcode::KickPlayer, on_kick_player),
    ];
    for (opcode, handler) in packets {
        router.register(EventKey::Packet(opcode), Priority::Last, handler);
    }

    router.register(EventKey::LeaveGame, Priority::Last, leave_game);
    router.register(EventKey::TerminateGame, Priority::Last, terminate_game);
    router.register(EventKey::DeleteGame, Priority::Last, delete_game);
    router.register(EventKey::PrepareGame, Priority::Last, prepare_game);
    router.register(EventKey::StartGame, Priority::Last, start_game);
}

/// Extracts the sender and packet from a packet event
fn packet(event: &Event) -> Option<(SessionId, &ClientPacket)> {
    match event {
        Event::Packet { sid, packet } => Some((*sid, packet)),
        _ => None,
    }
}

/// Game the player is currently a member of
fn current_game(ctx: &ServerContext, sid: &SessionId) -> Option<GameId> {
    ctx.sessions.get(sid)?.game
}

fn on_create_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::CreateGame(request))) = packet(event) else {
        return Ok(true);
    };
    create_game(ctx, sid, request)
}

/// Creates a game with the sender as creator and first member
fn create_game(ctx: &mut ServerContext, sid: SessionId, request: &CreateGame) -> HandlerResult {
    let min_players = ctx.capabilities().min_players;
    let max_players = ctx.capabilities().max_players;
    if request.max_players < min_players {
        return Err(LobbyError::soft(
            Message::new("You can't run a game with less than {count} players")
                .arg("count", min_players),
        ));
    }
    if request.max_players > max_players {
        return Err(LobbyError::soft(
            Message::new("You can't run a game with more than {count} players")
                .arg("count", max_players),
        ));
    }

    let Some(player) = ctx.sessions.get_mut(&sid) else {
        return Ok(false);
    };
    if player.game.is_some() {
        return Err(LobbyError::soft("You can't create a game while in another game"));
    }

    player.name = request.player_name.clone();
    player.color = request.player_color.unwrap_or(1);
    player.client_id = request.client_id.clone();
    player.version = request.client_version;
    player.ready = false;
    player.prepared = false;

    let game = Game::new(player, request, min_players);
    player.game = Some(game.uuid);
    debug!("{} created game {} on '{}'", player, game.uuid, game.map_name);

    let uuid = ctx.games.insert(game);
    ctx.broadcast_snapshot(&uuid);
    Ok(true)
}

/// Answers with the open games matching the sender's protocol and filters
fn on_list_games(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::ListGames(filter))) = packet(event) else {
        return Ok(true);
    };
    let Some(player) = ctx.sessions.get(&sid) else {
        return Ok(false);
    };
    let games = list_games(ctx, player.protocol, filter);
    debug!("{} listed {} games", player, games.len());
    ctx.send_to(&sid, &ServerPacket::GamesList(games));
    Ok(true)
}

fn list_games(ctx: &ServerContext, protocol: u32, filter: &ListGames) -> Vec<GameSummary> {
    ctx.games
        .joinable(protocol, filter)
        .map(|game| game.summary(&ctx.sessions))
        .collect()
}

fn on_join_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::JoinGame(request))) = packet(event) else {
        return Ok(true);
    };
    join_game(ctx, sid, request)
}

/// Adds the sender to an open game after password and uniqueness checks
fn join_game(ctx: &mut ServerContext, sid: SessionId, request: &JoinGame) -> HandlerResult {
    let Some(player) = ctx.sessions.get(&sid) else {
        return Ok(false);
    };
    if player.game.is_some() {
        return Err(LobbyError::soft("You can't join a game while in another game"));
    }
    let protocol = player.protocol;

    let Some(game) = ctx.games.find(&request.uuid, request.client_version) else {
        return Err(LobbyError::soft("Unknown game or game is running a different version"));
    };
    if !game.is_open() {
        return Err(LobbyError::soft("Game has already started. No more joining"));
    }
    if game.is_full() {
        return Err(LobbyError::soft("Game is full"));
    }
    if let Some(password) = &game.password {
        if request.password.as_deref() != Some(password.as_str()) {
            return Err(LobbyError::soft("Wrong password"));
        }
    }

    let color = request
        .player_color
        .unwrap_or_else(|| game.free_color(&ctx.sessions));

    for member in game.members(&ctx.sessions) {
        if member.name == request.player_name {
            return Err(LobbyError::soft(
                Message::new("There's already a player with your name inside this game.")
                    .then("Please change your name."),
            ));
        }
        if member.color == color {
            return Err(LobbyError::soft(
                Message::new("There's already a player with your color inside this game.")
                    .then("Please change your color."),
            ));
        }
        if member.client_id == request.client_id {
            return Err(LobbyError::soft(
                Message::new(
                    "There's already a player with your unique player ID inside this game.",
                )
                .then("This should never occur."),
            ));
        }
    }

    let uuid = game.uuid;
    let Some(game) = ctx.games.get_mut(&uuid) else {
        return Ok(false);
    };
    if !game.add_player(sid) {
        return Err(LobbyError::soft("Game is full"));
    }
    let full = game.is_full();

    if let Some(player) = ctx.sessions.get_mut(&sid) {
        player.name = request.player_name.clone();
        player.color = color;
        player.client_id = request.client_id.clone();
        player.version = request.client_version;
        player.ready = false;
        player.prepared = false;
        player.game = Some(uuid);
        debug!("{} joined game {}", player, uuid);
    }
    ctx.broadcast_snapshot(&uuid);

    // Protocol 0 clients have no ready toggle; a full game starts loading.
    if protocol == 0 && full {
        ctx.fire(Event::PrepareGame { game: uuid });
    }
    Ok(true)
}

/// Explicit leave request; acknowledged with Ok
fn on_leave_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::LeaveGame)) = packet(event) else {
        return Ok(true);
    };
    if current_game(ctx, &sid).is_none() {
        return Err(LobbyError::soft("You are not inside a game"));
    }
    let left = ctx.fire(Event::LeaveGame { sid });
    ctx.send_to(&sid, &ServerPacket::Ok);
    Ok(left)
}

/// Removes a player from their game, terminating or deleting it when needed
fn leave_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::LeaveGame { sid } = event else {
        return Ok(true);
    };
    let Some(uuid) = current_game(ctx, sid) else {
        return Ok(false);
    };
    let Some(game) = ctx.games.get_mut(&uuid) else {
        if let Some(player) = ctx.sessions.get_mut(sid) {
            player.reset_game();
        }
        return Ok(false);
    };

    // Leaving a game that is already loading or running ends it for everyone.
    if !game.is_open() {
        return Ok(ctx.fire(Event::TerminateGame {
            game: uuid,
            by: Some(*sid),
        }));
    }

    game.remove_player(sid);
    let empty = game.is_empty();
    let creator_left = game.creator == *sid;
    if let Some(player) = ctx.sessions.get_mut(sid) {
        debug!("{} left game {}", player, uuid);
        player.reset_game();
    }

    if empty {
        Ok(ctx.fire(Event::DeleteGame { game: uuid }))
    } else if creator_left {
        Ok(ctx.fire(Event::TerminateGame {
            game: uuid,
            by: Some(*sid),
        }))
    } else {
        ctx.broadcast_snapshot(&uuid);
        Ok(true)
    }
}

/// Notifies the remaining members that the game ended, then deletes it
fn terminate_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::TerminateGame { game: uuid, by } = event else {
        return Ok(true);
    };
    let Some(game) = ctx.games.get(uuid) else {
        return Ok(false);
    };
    let open = game.is_open();
    let notice = if open {
        Message::new("The game has been terminated. The creator has left the game.")
    } else {
        Message::new("The game has been terminated. One player has left the game.")
    };
    let members = game.players.clone();
    info!(
        "Terminating game {} (by {})",
        uuid,
        by.map_or_else(|| "server".to_string(), |sid| sid.to_string())
    );

    for member in members {
        if Some(member) == *by {
            continue;
        }
        let Some(player) = ctx.sessions.get(&member) else {
            continue;
        };
        if player.disconnecting {
            continue;
        }
        // Legacy clients cannot leave a loading or running game gracefully.
        if !open && player.uses_old_protocol() {
            ctx.fatal_error(
                &member,
                &Message::new("One player has terminated their game.")
                    .then("For technical reasons, this currently means the game cannot continue.")
                    .then("We are very sorry about that."),
            );
        } else {
            ctx.error(&member, &notice, ErrorKind::TerminateGame);
        }
    }

    Ok(ctx.fire(Event::DeleteGame { game: *uuid }))
}

/// Drops the game from the registry and clears its members' game state
fn delete_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::DeleteGame { game: uuid } = event else {
        return Ok(true);
    };
    let Some(game) = ctx.games.remove(uuid) else {
        return Ok(false);
    };
    for sid in &game.players {
        if let Some(player) = ctx.sessions.get_mut(sid) {
            if player.game == Some(*uuid) {
                player.reset_game();
            }
        }
    }
    Ok(true)
}

/// Moves the game to Prepare and asks every member to load it
fn prepare_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::PrepareGame { game: uuid } = event else {
        return Ok(true);
    };
    let Some(game) = ctx.games.get_mut(uuid) else {
        return Ok(false);
    };
    game.state = GameState::Prepare;
    let members = game.players.clone();
    info!("Preparing game {} with {} players", uuid, members.len());

    for sid in &members {
        if let Some(player) = ctx.sessions.get_mut(sid) {
            player.prepared = false;
        }
    }
    ctx.broadcast(uuid, &ServerPacket::PrepareGame);
    Ok(true)
}

/// Moves the game to Running and tells every member to start
fn start_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::StartGame { game: uuid } = event else {
        return Ok(true);
    };
    let Some(game) = ctx.games.get_mut(uuid) else {
        return Ok(false);
    };
    game.state = GameState::Running;
    info!("Starting game {} with {} players", uuid, game.player_count());
    ctx.broadcast(uuid, &ServerPacket::StartGame);
    Ok(true)
}

/// Flips the sender's ready flag; prepares the game once everyone is ready
fn on_toggle_ready(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::ToggleReady)) = packet(event) else {
        return Ok(true);
    };
    let Some(uuid) = current_game(ctx, &sid) else {
        return Ok(true);
    };
    if !ctx.games.get(&uuid).map_or(false, Game::is_open) {
        return Ok(true);
    }

    if let Some(player) = ctx.sessions.get_mut(&sid) {
        player.toggle_ready();
        debug!(
            "{} is {}ready in game {}",
            player,
            if player.ready { "" } else { "not " },
            uuid
        );
    }
    ctx.broadcast_snapshot(&uuid);

    let ready = ctx
        .games
        .get(&uuid)
        .map_or(false, |game| game.is_ready(&ctx.sessions));
    if ready {
        ctx.fire(Event::PrepareGame { game: uuid });
    }
    Ok(true)
}

/// Records a load acknowledgement; starts the game once all members loaded
fn on_prepared_game(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::PreparedGame)) = packet(event) else {
        return Ok(true);
    };
    let Some(uuid) = current_game(ctx, &sid) else {
        return Ok(true);
    };
    let preparing = ctx
        .games
        .get(&uuid)
        .map_or(false, |game| game.state == GameState::Prepare);
    if !preparing {
        debug!("Ignoring prepared ack from {} outside of Prepare", sid);
        return Ok(true);
    }

    if let Some(player) = ctx.sessions.get_mut(&sid) {
        player.prepared = true;
        debug!("{} prepared game {}", player, uuid);
    }
    let all_prepared = ctx
        .games
        .get(&uuid)
        .map_or(false, |game| game.all_prepared(&ctx.sessions));
    if all_prepared {
        ctx.fire(Event::StartGame { game: uuid });
    }
    Ok(true)
}

/// Broadcasts a chat line to every member of an open game
fn on_chat(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::ChatMsg { message })) = packet(event) else {
        return Ok(true);
    };
    let Some(player) = ctx.sessions.get(&sid) else {
        return Ok(false);
    };
    let Some(uuid) = player.game else {
        ctx.send_to(&sid, &ServerPacket::Ok);
        return Ok(true);
    };
    if !ctx.games.get(&uuid).map_or(false, Game::is_open) {
        return Ok(true);
    }

    debug!("[{}] {}: {}", uuid, player.name, message);
    let chat = ServerPacket::ChatMsg {
        name: player.name.clone(),
        message: message.clone(),
    };
    ctx.broadcast(&uuid, &chat);
    Ok(true)
}

/// Renames the sender unless another member already uses the name
fn on_change_name(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::ChangeName { name })) = packet(event) else {
        return Ok(true);
    };
    let Some(player) = ctx.sessions.get(&sid) else {
        return Ok(false);
    };
    let Some(uuid) = player.game else {
        ctx.send_to(&sid, &ServerPacket::Ok);
        return Ok(true);
    };
    if &player.name == name {
        return Ok(true);
    }
    let Some(game) = ctx.games.get(&uuid).filter(|game| game.is_open()) else {
        return Ok(true);
    };
    if game.members(&ctx.sessions).any(|member| &member.name == name) {
        return Err(LobbyError::soft(
            Message::new("There's already a player with your name inside this game.")
                .then("Unable to change your name."),
        ));
    }

    if let Some(player) = ctx.sessions.get_mut(&sid) {
        debug!("[{}] {} is now known as {:?}", uuid, player, name);
        player.name = name.clone();
    }
    ctx.broadcast_snapshot(&uuid);
    Ok(true)
}

/// Recolors the sender unless another member already uses the color
fn on_change_color(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::ChangeColor { color })) = packet(event) else {
        return Ok(true);
    };
    let Some(player) = ctx.sessions.get(&sid) else {
        return Ok(false);
    };
    let Some(uuid) = player.game else {
        ctx.send_to(&sid, &ServerPacket::Ok);
        return Ok(true);
    };
    if player.color == *color {
        return Ok(true);
    }
    let Some(game) = ctx.games.get(&uuid).filter(|game| game.is_open()) else {
        return Ok(true);
    };
    if game.members(&ctx.sessions).any(|member| member.color == *color) {
        return Err(LobbyError::soft(
            Message::new("There's already a player with your color inside this game.")
                .then("Unable to change your color."),
        ));
    }

    if let Some(player) = ctx.sessions.get_mut(&sid) {
        debug!("[{}] {} changed color {} -> {}", uuid, player, player.color, color);
        player.color = *color;
    }
    ctx.broadcast_snapshot(&uuid);
    Ok(true)
}

/// Lets the creator remove another member from an open game
fn on_kick_player(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Some((sid, ClientPacket::KickPlayer { sid: target })) = packet(event) else {
        return Ok(true);
    };
    let Some(uuid) = current_game(ctx, &sid) else {
        return Ok(true);
    };
    let Some(game) = ctx.games.get(&uuid) else {
        return Ok(true);
    };
    if !game.is_open() || game.creator != sid || *target == sid || !game.contains(target) {
        debug!("Ignoring invalid kick of {} by {}", target, sid);
        return Ok(true);
    }
    let Some(kicked) = ctx.sessions.get(target).map(|player| player.info()) else {
        return Ok(true);
    };

    info!("[{}] {:?} got kicked", uuid, kicked.name);
    ctx.broadcast(&uuid, &ServerPacket::KickPlayer(kicked));
    Ok(ctx.fire(Event::LeaveGame { sid: *target }))
}
