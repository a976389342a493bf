//! Server network layer: owns the transport and drives the event loop

use crate::config::ServerConfig;
use crate::context::{Outgoing, ServerContext};
use crate::error::ServerError;
use crate::i18n::Localizer;
use crate::stats::StatisticsReporter;
use crate::transport::{NetEvent, Transport};
use log::{debug, info};
use std::net::SocketAddr;
use std::time::Duration;

/// Lobby server bound to a listening socket
pub struct Server {
    transport: Transport,
    ctx: ServerContext,
    poll_timeout: Duration,
    statistics: Option<StatisticsReporter>,
}

impl Server {
    /// Loads locale catalogs and binds the listener. Any failure here is
    /// fatal for the process.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let localizer = match &config.locale_dir {
            Some(dir) => Localizer::load_dir(dir)?,
            None => Localizer::new(),
        };

        let transport =
            Transport::bind(&config.address(), config.max_packet_size, config.max_peers).await?;

        let statistics = config
            .statistics_file
            .clone()
            .map(|path| StatisticsReporter::new(path, config.statistics_interval));

        Ok(Server {
            transport,
            ctx: ServerContext::new(config, localizer),
            poll_timeout: config.poll_timeout,
            statistics,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    /// Polls the transport once and processes the resulting event to
    /// completion, including every packet it queued.
    pub async fn step(&mut self) {
        if let Some(reporter) = &mut self.statistics {
            reporter.tick(&self.ctx);
        }

        let event = self.transport.poll(self.poll_timeout).await;
        if event == NetEvent::None {
            return;
        }

        let handled = self.ctx.dispatch(event);
        if !handled {
            debug!("Event was not fully handled");
        }
        self.flush();
    }

    fn flush(&mut self) {
        for outgoing in self.ctx.take_outbox() {
            match outgoing {
                Outgoing::Packet { peer, data } => self.transport.send(peer, data),
                Outgoing::Disconnect { peer } => self.transport.disconnect(peer),
            }
        }
    }

    /// Main server loop. Never returns under normal operation.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        info!("Server started successfully");
        loop {
            self.step().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{read_frame, write_frame, Frame};
    use shared::{decode_server, ServerPacket};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio_test::assert_ok;

    fn local_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            poll_timeout: Duration::from_millis(20),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = assert_ok!(Server::bind(&local_config()).await);
        let taken = ServerConfig {
            port: first.local_addr().port(),
            ..local_config()
        };

        let err = Server::bind(&taken).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_missing_locale_dir_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            locale_dir: Some(dir.path().join("nope")),
            ..local_config()
        };
        let err = Server::bind(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::LocaleIo { .. }));
    }

    #[tokio::test]
    async fn test_step_issues_session_on_connect() {
        let mut server = assert_ok!(Server::bind(&local_config()).await);
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream.write_all(&1u32.to_be_bytes()).await.unwrap();

        while server.context().sessions.is_empty() {
            server.step().await;
        }

        let frame = read_frame(&mut stream, 1024).await.unwrap();
        let Frame::Data(data) = frame else {
            panic!("unexpected oversized frame");
        };
        assert!(matches!(decode_server(&data).unwrap(), ServerPacket::Session { .. }));

        write_frame(&mut stream, &[0u8; 4]).await.unwrap();
        drop(stream);
        while !server.context().sessions.is_empty() {
            server.step().await;
        }
    }

    #[tokio::test]
    async fn test_statistics_written_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.txt");
        let config = ServerConfig {
            statistics_file: Some(path.clone()),
            ..local_config()
        };
        let mut server = assert_ok!(Server::bind(&config).await);

        for _ in 0..100 {
            server.step().await;
            if let Ok(contents) = tokio::fs::read_to_string(&path).await {
                if contents.contains("Players.OldProtocol: 0") {
                    assert!(contents.contains("Players.Total: 0"));
                    return;
                }
            }
        }
        panic!("statistics file was never written");
    }
}
