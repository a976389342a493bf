//! Error types for server startup and packet handling.

use crate::i18n::Message;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read locale catalog {}: {source}", path.display())]
    LocaleIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse locale catalog {}: {source}", path.display())]
    LocaleParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a failed handler, reported to the player that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LobbyError {
    /// Reported with an error packet; the player stays connected.
    #[error("{0}")]
    Soft(Message),
    /// Reported with a fatal error packet, then the player is disconnected.
    #[error("{0}")]
    Fatal(Message),
}

impl LobbyError {
    pub fn soft(message: impl Into<Message>) -> Self {
        LobbyError::Soft(message.into())
    }

    pub fn fatal(message: impl Into<Message>) -> Self {
        LobbyError::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, LobbyError::Fatal(_))
    }
}
