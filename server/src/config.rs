//! Command line arguments and the resulting server configuration.

use clap::Parser;
use shared::{Capabilities, DEFAULT_MAX_PACKET_SIZE, DEFAULT_MAX_PLAYERS, DEFAULT_MIN_PLAYERS};
use std::path::PathBuf;
use std::time::Duration;

/// Most peers the transport keeps connected at once.
pub const MAX_PEERS: usize = 4095;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multiplayer lobby and relay server", long_about = None)]
pub struct Args {
    /// Server IP address or hostname to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "2002")]
    pub port: u16,

    /// File the statistics are periodically written to
    #[arg(short = 's', long)]
    pub statistics_file: Option<PathBuf>,

    /// Seconds between statistics updates
    #[arg(long, default_value = "60")]
    pub statistics_interval: u64,

    /// Global packet size limit in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    pub max_packet_size: usize,

    /// Milliseconds a single poll waits for network events
    #[arg(long, default_value = "500")]
    pub poll_timeout: u64,

    /// Directory with <language>.json message catalogs
    #[arg(short = 'l', long)]
    pub locale_dir: Option<PathBuf>,

    /// Smallest allowed player limit for new games
    #[arg(long, default_value_t = DEFAULT_MIN_PLAYERS)]
    pub min_players: u32,

    /// Largest allowed player limit for new games
    #[arg(long, default_value_t = DEFAULT_MAX_PLAYERS)]
    pub max_players: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub statistics_file: Option<PathBuf>,
    pub statistics_interval: Duration,
    pub poll_timeout: Duration,
    pub max_packet_size: usize,
    pub max_peers: usize,
    pub min_players: u32,
    pub max_players: u32,
    pub locale_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Limits advertised to clients in their session packet.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            min_players: self.min_players,
            max_players: self.max_players,
            max_packet_size: self.max_packet_size as u64,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2002,
            statistics_file: None,
            statistics_interval: Duration::from_secs(60),
            poll_timeout: Duration::from_millis(500),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_peers: MAX_PEERS,
            min_players: DEFAULT_MIN_PLAYERS,
            max_players: DEFAULT_MAX_PLAYERS,
            locale_dir: None,
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            statistics_file: args.statistics_file,
            statistics_interval: Duration::from_secs(args.statistics_interval),
            poll_timeout: Duration::from_millis(args.poll_timeout),
            max_packet_size: args.max_packet_size,
            max_peers: MAX_PEERS,
            min_players: args.min_players,
            max_players: args.max_players,
            locale_dir: args.locale_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_arguments() {
        let config = ServerConfig::from(Args::parse_from(["server"]));
        assert_eq!(config.address(), "127.0.0.1:2002");
        assert_eq!(config.statistics_interval, Duration::from_secs(60));
        assert_eq!(config.poll_timeout, Duration::from_millis(500));
        assert_eq!(config.max_packet_size, 2 * 1024 * 1024);
        assert!(config.statistics_file.is_none());
    }

    #[test]
    fn test_arguments_override_defaults() {
        let args = Args::parse_from([
            "server",
            "-H",
            "0.0.0.0",
            "--port",
            "9000",
            "--statistics-file",
            "/tmp/stats.txt",
            "--statistics-interval",
            "5",
            "--max-players",
            "6",
        ]);
        let config = ServerConfig::from(args);

        assert_eq!(config.address(), "0.0.0.0:9000");
        assert_eq!(config.statistics_file, Some(PathBuf::from("/tmp/stats.txt")));
        assert_eq!(config.statistics_interval, Duration::from_secs(5));
        assert_eq!(config.capabilities().max_players, 6);
        assert_eq!(config.capabilities().min_players, 2);
    }
}
