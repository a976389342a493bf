//! Game data relay for running games.
//!
//! Frames from a member of a Running game are forwarded unchanged to every
//! other member. The server never looks past the session id prefix.

use crate::context::ServerContext;
use crate::dispatch::{Event, EventKey, HandlerResult, Priority, Router};
use crate::transport::PeerId;
use log::trace;

pub fn register_handlers(router: &mut Router) {
    router.register(EventKey::GameData, Priority::Last, on_game_data);
}

fn on_game_data(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::GameData { sid, data } = event else {
        return Ok(true);
    };
    let Some(game) = ctx
        .sessions
        .get(sid)
        .and_then(|player| player.game)
        .and_then(|uuid| ctx.games.get(&uuid))
    else {
        return Ok(false);
    };
    if !game.is_running() {
        return Ok(false);
    }

    let targets: Vec<PeerId> = game
        .members(&ctx.sessions)
        .filter(|player| player.sid != *sid && !player.disconnecting)
        .map(|player| player.peer)
        .collect();
    trace!("[{}] relaying {} bytes to {} peers", game.uuid, data.len(), targets.len());

    for peer in targets {
        ctx.send_raw(peer, data.clone());
    }
    Ok(true)
}
