//! TCP transport exposing connections as a stream of polled events.
//!
//! Each accepted socket gets a reader task and a writer task. Both report to
//! the owner of the [`Transport`] through one channel, so the event loop sees
//! connect, receive and disconnect events for every peer in the order the
//! socket delivered them, one event per [`Transport::poll`].
//!
//! Wire framing is a 4-byte big-endian length followed by the payload. A
//! freshly connected client first sends its protocol version as a single
//! big-endian `u32`.

use crate::error::ServerError;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long a new connection may take to announce its protocol version.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A received frame. Frames above the global size limit are drained from
/// the socket without being buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    Oversized(usize),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Data(data) => data.len(),
            Frame::Oversized(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    None,
    Connect { peer: PeerId, protocol: u32 },
    Disconnect { peer: PeerId },
    Receive { peer: PeerId, frame: Frame },
}

/// Messages from socket tasks to the transport owner
enum RawEvent {
    Connected {
        peer: PeerId,
        protocol: u32,
        link: PeerLink,
    },
    Received {
        peer: PeerId,
        frame: Frame,
    },
    Closed {
        peer: PeerId,
    },
}

/// Messages from the transport owner to a writer task
enum Outbound {
    Data(Vec<u8>),
    Close,
}

struct PeerLink {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Dropping this stops the reader task.
    _stop: oneshot::Sender<()>,
    closing: bool,
}

pub struct Transport {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<RawEvent>,
    peers: HashMap<PeerId, PeerLink>,
    max_peers: usize,
    accept_task: JoinHandle<()>,
}

impl Transport {
    /// Binds the listening socket. Failure here is fatal for the server.
    pub async fn bind(
        addr: &str,
        max_packet_size: usize,
        max_peers: usize,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (events_tx, events) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, events_tx, max_packet_size));

        Ok(Transport {
            local_addr,
            events,
            peers: HashMap::new(),
            max_peers,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Waits up to `timeout` for the next event.
    pub async fn poll(&mut self, timeout: Duration) -> NetEvent {
        let deadline = Instant::now() + timeout;

        loop {
            let raw = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    tokio::time::sleep_until(deadline).await;
                    return NetEvent::None;
                }
                Err(_) => return NetEvent::None,
            };

            match raw {
                RawEvent::Connected {
                    peer,
                    protocol,
                    link,
                } => {
                    if self.peers.len() >= self.max_peers {
                        warn!("Dropping {} from {}: peer limit reached", peer, link.addr);
                        continue;
                    }
                    debug!("{} connected from {}", peer, link.addr);
                    self.peers.insert(peer, link);
                    return NetEvent::Connect { peer, protocol };
                }
                RawEvent::Received { peer, frame } => match self.peers.get(&peer) {
                    Some(link) if !link.closing => return NetEvent::Receive { peer, frame },
                    _ => continue,
                },
                RawEvent::Closed { peer } => {
                    if let Some(link) = self.peers.remove(&peer) {
                        debug!("{} at {} disconnected", peer, link.addr);
                        return NetEvent::Disconnect { peer };
                    }
                }
            }
        }
    }

    pub fn send(&mut self, peer: PeerId, data: Vec<u8>) {
        match self.peers.get(&peer) {
            Some(link) if !link.closing => {
                if link.outbound.send(Outbound::Data(data)).is_err() {
                    debug!("Writer for {} is gone, dropping frame", peer);
                }
            }
            _ => debug!("Dropping frame for unknown or closing {}", peer),
        }
    }

    /// Closes the connection once every frame queued so far is written. The
    /// matching disconnect event is reported by a later poll.
    pub fn disconnect(&mut self, peer: PeerId) {
        if let Some(link) = self.peers.get_mut(&peer) {
            if !link.closing {
                debug!("Disconnecting {} at {}", peer, link.addr);
                link.closing = true;
                let _ = link.outbound.send(Outbound::Close);
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<RawEvent>,
    max_packet_size: usize,
) {
    let mut next_peer = 1u32;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let peer = PeerId(next_peer);
                next_peer = next_peer.wrapping_add(1);
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    peer,
                    events.clone(),
                    max_packet_size,
                ));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Runs the handshake, then reads frames until the socket closes or the
/// transport forgets the peer.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peer: PeerId,
    events: mpsc::UnboundedSender<RawEvent>,
    max_packet_size: usize,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();

    let protocol = match tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_u32()).await {
        Ok(Ok(protocol)) => protocol,
        Ok(Err(e)) => {
            debug!("Handshake from {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            debug!("Handshake from {} timed out", addr);
            return;
        }
    };

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (stop, mut stopped) = oneshot::channel();
    tokio::spawn(write_loop(writer, outbound_rx, peer, events.clone()));

    let link = PeerLink {
        addr,
        outbound,
        _stop: stop,
        closing: false,
    };
    if events
        .send(RawEvent::Connected {
            peer,
            protocol,
            link,
        })
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            frame = read_frame(&mut reader, max_packet_size) => match frame {
                Ok(frame) => {
                    if events.send(RawEvent::Received { peer, frame }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Read from {} ended: {}", addr, e);
                    let _ = events.send(RawEvent::Closed { peer });
                    break;
                }
            },
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    peer: PeerId,
    events: mpsc::UnboundedSender<RawEvent>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Data(data) => {
                if let Err(e) = write_frame(&mut writer, &data).await {
                    debug!("Write to {} failed: {}", peer, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    let _ = events.send(RawEvent::Closed { peer });
}

/// Writes one length-delimited frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_u32(len).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// Reads one length-delimited frame. Frames longer than `max_size` are
/// skipped and reported as [`Frame::Oversized`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> io::Result<Frame> {
    let len = reader.read_u32().await? as usize;

    if len > max_size {
        let mut limited = (&mut *reader).take(len as u64);
        let drained = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if drained < len as u64 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        return Ok(Frame::Oversized(len));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Frame::Data(data))
}
