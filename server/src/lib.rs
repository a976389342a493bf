//! # Lobby Server Library
//!
//! This library implements a multiplayer lobby and relay server. Clients
//! connect over TCP, receive a session token, and then create, discover,
//! join and leave game lobbies. Once every member of a lobby is ready and
//! has loaded the game, the server turns into a relay that forwards game
//! traffic between the members unchanged.
//!
//! ## Core Responsibilities
//!
//! ### Session Management
//! Every accepted connection that announces a supported protocol version
//! receives a random session id. All subsequent frames must carry that id;
//! a mismatch is treated as a fatal protocol violation.
//!
//! ### Lobby State Machine
//! Games move through three states:
//! - **Open**: players join, leave, chat, change name/color and toggle ready
//! - **Prepare**: every member loads the game and acknowledges when done
//! - **Running**: frames from a member are relayed to the other members
//!
//! Leaving an Open game only affects the leaver, unless the leaver is the
//! creator. Leaving a game in Prepare or Running terminates it for everyone.
//!
//! ### Error Reporting
//! Handler failures are either soft (an error packet, the player stays
//! connected) or fatal (a fatal error packet followed by a disconnect).
//! Messages are translated into the language each player asked for.
//!
//! ## Architecture Design
//!
//! ### Single-Task Event Loop
//! One task owns the [`context::ServerContext`] and processes one transport
//! event at a time to completion. Socket I/O runs in separate tokio tasks
//! that talk to the loop only through channels, so no registry is ever
//! shared or locked.
//!
//! ### Event Dispatch
//! Transport events, decoded client packets and internal lobby transitions
//! are all fired through a [`dispatch::Router`] holding an ordered chain of
//! handlers per event key. Every handler of a chain always runs.
//!
//! ## Module Organization
//!
//! - `transport`: TCP listener, per-peer reader/writer tasks, framing
//! - `network`: the [`network::Server`] event loop
//! - `context`: registries, router, localizer and the outgoing queue
//! - `dispatch`: event keys, events and the handler table
//! - `connection`: connect/disconnect handling and packet validation
//! - `lobby`: create/list/join/leave and the Open/Prepare/Running transitions
//! - `relay`: forwarding game data in running games
//! - `session` and `game`: the player and game registries
//! - `i18n`: message catalogs and per-player locales
//! - `stats`: the periodic statistics file
//! - `config` and `error`: command line options and error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 2002,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Binds the listener and loads locale catalogs; fails on a taken port
//!     let mut server = Server::bind(&config).await?;
//!
//!     // Runs the event loop forever
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod i18n;
pub mod lobby;
pub mod network;
pub mod relay;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testing;
