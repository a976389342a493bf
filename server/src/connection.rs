//! Connection lifecycle and inbound packet validation.
//!
//! - Connect: protocol check, session id issue
//! - Disconnect: implicit leave, then the player record is dropped
//! - Receive: size limits, session id check, decoding, dispatch by opcode
//!
//! Also handles the session-level packets (language selection and errors
//! reported by the client).

use crate::context::ServerContext;
use crate::dispatch::{Event, EventKey, HandlerResult, Priority, Router};
use crate::error::LobbyError;
use crate::i18n::{Locale, Message};
use crate::session::Player;
use crate::transport::Frame;
use log::{debug, warn};
use shared::{
    decode_client, peek_session, ClientPacket, CodecError, Opcode, ServerPacket, PROTOCOLS,
};

pub fn register_handlers(router: &mut Router) {
    router.register(EventKey::Connect, Priority::Last, on_connect);
    router.register(EventKey::Disconnect, Priority::Last, on_disconnect);
    router.register(EventKey::Receive, Priority::Last, on_receive);
    router.register(
        EventKey::Packet(Opcode::SessionProps),
        Priority::Last,
        on_session_props,
    );
    router.register(EventKey::Packet(Opcode::Error), Priority::Last, on_client_error);
    router.register(
        EventKey::Packet(Opcode::FatalError),
        Priority::Last,
        on_client_fatal_error,
    );
}

fn global_size_message() -> Message {
    Message::new("You've exceeded the global packet size.")
        .then("This should never happen. Please contact us or file a bug report.")
}

fn on_connect(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::Connect { peer, protocol } = event else {
        return Ok(true);
    };

    let sid = ctx.sessions.generate_id();
    let player = Player::new(sid, *peer, *protocol);

    if !PROTOCOLS.contains(protocol) {
        warn!("{} runs an old or unsupported protocol", player);
        ctx.peer_fatal_error(
            *peer,
            &Message::new(
                "Old or unsupported multiplayer protocol. Please check your game version",
            ),
        );
        return Ok(false);
    }

    debug!("New client: {}", player);
    ctx.sessions.admit(player);
    let capabilities = ctx.capabilities().clone();
    ctx.send(*peer, &ServerPacket::Session { sid, capabilities });
    Ok(true)
}

fn on_disconnect(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::Disconnect { peer } = event else {
        return Ok(true);
    };
    // Rejected protocols never got a player record.
    let Some(sid) = ctx.sessions.sid_for_peer(*peer) else {
        return Ok(true);
    };

    let in_game = match ctx.sessions.get_mut(&sid) {
        Some(player) => {
            debug!("{} disconnected", player);
            player.disconnecting = true;
            player.game.is_some()
        }
        None => false,
    };
    if in_game {
        ctx.fire(Event::LeaveGame { sid });
    }

    ctx.sessions.remove(&sid);
    Ok(true)
}

fn on_receive(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::Receive { peer, frame } = event else {
        return Ok(true);
    };

    let Some(sid) = ctx.sessions.sid_for_peer(*peer) else {
        warn!("Packet from unknown {}", peer);
        ctx.peer_fatal_error(*peer, &Message::new("I don't know you"));
        return Ok(false);
    };

    let data = match frame {
        Frame::Data(data) if data.len() <= ctx.max_packet_size() => data,
        _ => {
            warn!("Global packet size exceeded by {}: size={}", peer, frame.len());
            return Err(LobbyError::Fatal(global_size_message()));
        }
    };

    let Some(player) = ctx.sessions.get(&sid) else {
        return Ok(false);
    };
    let protocol = player.protocol;
    let running = player
        .game
        .and_then(|game| ctx.games.get(&game))
        .map_or(false, |game| game.is_running());

    match peek_session(data) {
        Ok(claimed) if claimed == sid => {}
        Ok(claimed) => {
            warn!("Invalid session id from {} ({} vs {})", peer, claimed, sid);
            return Err(LobbyError::fatal("Invalid/Unknown session"));
        }
        Err(e) => {
            warn!("Unknown or malformed packet from {}: {}", player, e);
            return Err(LobbyError::fatal(
                "Unknown or malformed packet. Please check your game version",
            ));
        }
    }

    // Running games only relay; the payload is never parsed.
    if running {
        return Ok(ctx.fire(Event::GameData {
            sid,
            data: data.clone(),
        }));
    }

    let packet = match decode_client(data, protocol, ctx.max_packet_size()) {
        Ok((_, packet)) => packet,
        Err(CodecError::PacketTooLarge { opcode, size, max }) => {
            warn!("Per packet size exceeded by {}: {:?} size={} max={}", player, opcode, size, max);
            return Err(LobbyError::soft(
                Message::new("Packet too large: {size} bytes, the limit is {max} bytes.")
                    .arg("size", size)
                    .arg("max", max),
            ));
        }
        Err(CodecError::GlobalSizeExceeded { .. }) => {
            return Err(LobbyError::Fatal(global_size_message()));
        }
        Err(e) => {
            warn!("Unknown or malformed packet from {}: {}", player, e);
            return Err(LobbyError::fatal(
                "Unknown or malformed packet. Please check your game version",
            ));
        }
    };

    let key = EventKey::Packet(packet.opcode());
    if !ctx.router.is_registered(key) {
        warn!("Unhandled {:?} packet from {} - ignoring", key, peer);
        return Ok(true);
    }
    Ok(ctx.fire(Event::Packet { sid, packet }))
}

fn on_session_props(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::Packet {
        sid,
        packet: ClientPacket::SessionProps { language },
    } = event
    else {
        return Ok(true);
    };

    let available = ctx.localizer.has_language(language);
    if let Some(player) = ctx.sessions.get_mut(sid) {
        debug!("Session properties of {}: language={}", player, language);
        if available {
            player.locale = Locale::new(language.clone());
        }
    }
    ctx.send_to(sid, &ServerPacket::Ok);
    Ok(true)
}

fn on_client_error(_ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    if let Event::Packet {
        sid,
        packet: ClientPacket::Error { message },
    } = event
    {
        debug!("Client {} reported error: {}", sid, message);
    }
    Ok(true)
}

fn on_client_fatal_error(ctx: &mut ServerContext, event: &Event) -> HandlerResult {
    let Event::Packet {
        sid,
        packet: ClientPacket::FatalError { message },
    } = event
    else {
        return Ok(true);
    };

    debug!("Client {} reported fatal error: {}", sid, message);
    if let Some(player) = ctx.sessions.get_mut(sid) {
        player.disconnecting = true;
        let peer = player.peer;
        ctx.disconnect(peer);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::Outgoing;
    use crate::i18n::Localizer;
    use crate::transport::{NetEvent, PeerId};
    use shared::{decode_server, encode_client, SessionId};
    use std::collections::HashMap;

    fn context() -> ServerContext {
        ServerContext::new(&ServerConfig::default(), Localizer::new())
    }

    fn packets_for(outbox: &[Outgoing], peer: PeerId) -> Vec<ServerPacket> {
        outbox
            .iter()
            .filter_map(|out| match out {
                Outgoing::Packet { peer: p, data } if *p == peer => {
                    Some(decode_server(data).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    fn disconnected(outbox: &[Outgoing], peer: PeerId) -> bool {
        outbox.contains(&Outgoing::Disconnect { peer })
    }

    fn connect(ctx: &mut ServerContext, peer: PeerId, protocol: u32) -> SessionId {
        ctx.dispatch(NetEvent::Connect { peer, protocol });
        let outbox = ctx.take_outbox();
        match packets_for(&outbox, peer).as_slice() {
            [ServerPacket::Session { sid, .. }] => *sid,
            other => panic!("expected session packet, got {other:?}"),
        }
    }

    fn receive(ctx: &mut ServerContext, peer: PeerId, data: Vec<u8>) -> Vec<Outgoing> {
        ctx.dispatch(NetEvent::Receive {
            peer,
            frame: Frame::Data(data),
        });
        ctx.take_outbox()
    }

    #[test]
    fn test_connect_issues_session() {
        let mut ctx = context();
        let sid = connect(&mut ctx, PeerId(1), 1);
        assert_eq!(ctx.sessions.sid_for_peer(PeerId(1)), Some(sid));
    }

    #[test]
    fn test_unsupported_protocol_is_never_admitted() {
        let mut ctx = context();
        ctx.dispatch(NetEvent::Connect {
            peer: PeerId(1),
            protocol: 7,
        });
        let outbox = ctx.take_outbox();

        assert!(matches!(
            packets_for(&outbox, PeerId(1)).as_slice(),
            [ServerPacket::FatalError { .. }]
        ));
        assert!(disconnected(&outbox, PeerId(1)));
        assert!(ctx.sessions.is_empty());

        ctx.dispatch(NetEvent::Disconnect { peer: PeerId(1) });
        assert!(ctx.take_outbox().is_empty());
    }

    #[test]
    fn test_session_mismatch_is_always_fatal() {
        let mut ctx = context();
        connect(&mut ctx, PeerId(1), 1);

        let forged = SessionId([9; 16]);
        let data = encode_client(&forged, &ClientPacket::LeaveGame).unwrap();
        let outbox = receive(&mut ctx, PeerId(1), data);

        match packets_for(&outbox, PeerId(1)).as_slice() {
            [ServerPacket::FatalError { message }] => {
                assert_eq!(message, "Invalid/Unknown session")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(disconnected(&outbox, PeerId(1)));
    }

    #[test]
    fn test_session_mismatch_beats_soft_size_error() {
        let mut ctx = context();
        connect(&mut ctx, PeerId(1), 1);

        let packet = ClientPacket::ChangeName {
            name: "x".repeat(4000),
        };
        let data = encode_client(&SessionId([9; 16]), &packet).unwrap();
        let outbox = receive(&mut ctx, PeerId(1), data);

        assert!(matches!(
            packets_for(&outbox, PeerId(1)).as_slice(),
            [ServerPacket::FatalError { .. }]
        ));
    }

    #[test]
    fn test_opcode_size_limit_is_soft() {
        let mut ctx = context();
        let sid = connect(&mut ctx, PeerId(1), 1);

        let packet = ClientPacket::ChangeName {
            name: "x".repeat(4000),
        };
        let data = encode_client(&sid, &packet).unwrap();
        let size = data.len();
        let outbox = receive(&mut ctx, PeerId(1), data);

        match packets_for(&outbox, PeerId(1)).as_slice() {
            [ServerPacket::Error { message, .. }] => assert!(message.contains(&size.to_string())),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!disconnected(&outbox, PeerId(1)));
        assert!(ctx.sessions.contains(&sid));
    }

    #[test]
    fn test_global_size_limit_is_fatal() {
        let mut ctx = context();
        connect(&mut ctx, PeerId(1), 1);

        ctx.dispatch(NetEvent::Receive {
            peer: PeerId(1),
            frame: Frame::Oversized(3 * 1024 * 1024),
        });
        let outbox = ctx.take_outbox();

        assert!(matches!(
            packets_for(&outbox, PeerId(1)).as_slice(),
            [ServerPacket::FatalError { .. }]
        ));
        assert!(disconnected(&outbox, PeerId(1)));
    }

    #[test]
    fn test_malformed_packet_is_fatal() {
        let mut ctx = context();
        let sid = connect(&mut ctx, PeerId(1), 1);

        let mut data = sid.as_bytes().to_vec();
        data.extend_from_slice(&[99, 0, 0, 0, 1]);
        let outbox = receive(&mut ctx, PeerId(1), data);

        match packets_for(&outbox, PeerId(1)).as_slice() {
            [ServerPacket::FatalError { message }] => assert!(message.contains("malformed")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_peer_is_rejected() {
        let mut ctx = context();
        let outbox = receive(&mut ctx, PeerId(5), vec![1, 2, 3]);
        match packets_for(&outbox, PeerId(5)).as_slice() {
            [ServerPacket::FatalError { message }] => assert_eq!(message, "I don't know you"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(disconnected(&outbox, PeerId(5)));
    }

    #[test]
    fn test_unhandled_opcode_is_ignored() {
        let mut ctx = ServerContext::without_handlers(&ServerConfig::default(), Localizer::new());
        register_handlers(&mut ctx.router);
        let sid = connect(&mut ctx, PeerId(1), 1);

        let data = encode_client(&sid, &ClientPacket::ToggleReady).unwrap();
        assert!(receive(&mut ctx, PeerId(1), data).is_empty());
        assert!(ctx.sessions.contains(&sid));
    }

    #[test]
    fn test_session_props_select_known_language() {
        let mut localizer = Localizer::new();
        localizer.insert_catalog(
            "de",
            HashMap::from([(
                "Invalid/Unknown session".to_string(),
                "Ungültige Sitzung".to_string(),
            )]),
        );
        let mut ctx = ServerContext::new(&ServerConfig::default(), localizer);
        let sid = connect(&mut ctx, PeerId(1), 1);

        let props = ClientPacket::SessionProps {
            language: "de".to_string(),
        };
        let outbox = receive(&mut ctx, PeerId(1), encode_client(&sid, &props).unwrap());
        assert_eq!(packets_for(&outbox, PeerId(1)), vec![ServerPacket::Ok]);
        assert_eq!(ctx.sessions.get(&sid).unwrap().locale.language(), Some("de"));

        let forged = encode_client(&SessionId([0; 16]), &ClientPacket::LeaveGame).unwrap();
        let outbox = receive(&mut ctx, PeerId(1), forged);
        assert_eq!(
            packets_for(&outbox, PeerId(1)),
            vec![ServerPacket::FatalError {
                message: "Ungültige Sitzung".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_language_keeps_default() {
        let mut ctx = context();
        let sid = connect(&mut ctx, PeerId(1), 1);

        let props = ClientPacket::SessionProps {
            language: "xx".to_string(),
        };
        receive(&mut ctx, PeerId(1), encode_client(&sid, &props).unwrap());
        assert_eq!(ctx.sessions.get(&sid).unwrap().locale, Locale::default());
    }

    #[test]
    fn test_client_fatal_error_disconnects() {
        let mut ctx = context();
        let sid = connect(&mut ctx, PeerId(1), 1);

        let packet = ClientPacket::FatalError {
            message: "desync".to_string(),
        };
        let outbox = receive(&mut ctx, PeerId(1), encode_client(&sid, &packet).unwrap());
        assert_eq!(outbox, vec![Outgoing::Disconnect { peer: PeerId(1) }]);

        ctx.dispatch(NetEvent::Disconnect { peer: PeerId(1) });
        assert!(ctx.sessions.is_empty());
    }
}
