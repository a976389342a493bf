//! Periodic statistics dump.
//!
//! The server rewrites a small `Key: value` text file with aggregate game
//! and player counts. The event loop calls [`StatisticsReporter::tick`] after
//! every poll; the write itself happens on a spawned task.

use crate::context::ServerContext;
use log::{debug, error};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub games_total: usize,
    pub games_playing: usize,
    pub players_total: usize,
    pub players_lobby: usize,
    pub players_playing: usize,
    /// Players inside a game whose protocol is older than the latest one.
    pub players_old_protocol: usize,
}

impl Statistics {
    pub fn collect(ctx: &ServerContext) -> Self {
        let mut stats = Statistics {
            games_total: ctx.games.len(),
            games_playing: ctx.games.iter().filter(|game| game.is_running()).count(),
            players_total: ctx.sessions.len(),
            ..Statistics::default()
        };

        for player in ctx.sessions.players() {
            let Some(game) = player.game.and_then(|uuid| ctx.games.get(&uuid)) else {
                continue;
            };
            if game.is_running() {
                stats.players_playing += 1;
            } else {
                stats.players_lobby += 1;
            }
            if player.uses_old_protocol() {
                stats.players_old_protocol += 1;
            }
        }

        stats
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in [
            ("Games.Total", self.games_total),
            ("Games.Playing", self.games_playing),
            ("Players.Total", self.players_total),
            ("Players.Lobby", self.players_lobby),
            ("Players.Playing", self.players_playing),
            ("Players.OldProtocol", self.players_old_protocol),
        ] {
            let _ = writeln!(out, "{}: {}", key, value);
        }
        out
    }
}

/// Decides when a statistics file is due and writes it in the background.
pub struct StatisticsReporter {
    path: PathBuf,
    interval: Duration,
    last: Option<Instant>,
}

impl StatisticsReporter {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            last: None,
        }
    }

    /// Due on the first call and whenever `interval` has passed since the
    /// last emission.
    pub fn is_due(&self, now: Instant) -> bool {
        self.last
            .map_or(true, |last| now.duration_since(last) >= self.interval)
    }

    /// Emits the statistics if due. Returns the write task when one was
    /// spawned.
    pub fn tick(&mut self, ctx: &ServerContext) -> Option<tokio::task::JoinHandle<()>> {
        let now = Instant::now();
        if !self.is_due(now) {
            return None;
        }
        self.last = Some(now);

        let contents = Statistics::collect(ctx).render();
        let path = self.path.clone();
        Some(tokio::spawn(async move {
            match tokio::fs::write(&path, contents).await {
                Ok(()) => debug!("Wrote statistics to {}", path.display()),
                Err(e) => error!("Unable to write statistics file {}: {}", path.display(), e),
            }
        }))
    }
}
