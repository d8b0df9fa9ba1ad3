use super::{protocol, Envelope, PeerId, PeerInfo, PeerMessage};
use crate::engine::EngineEvent;
use crate::error::{Result, SwarmError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on a single frame, checked before allocating
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// How long a closing session may spend flushing queued messages
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Which side opened the transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A running session with one remote peer.
///
/// The reader task forwards decoded messages into the engine queue; the
/// writer task serializes whatever is pushed through [`Session::send`], in
/// submission order. Dropping the session aborts the reader and lets the
/// writer drain and close its half of the socket.
#[derive(Debug)]
pub struct Session {
    peer_id: PeerId,
    direction: Direction,
    outbox: mpsc::UnboundedSender<PeerMessage>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Session {
    /// Start reader and writer tasks over an already handshaked stream and
    /// hand the session to the engine.
    ///
    /// Returns false if the engine is gone.
    pub fn spawn(
        peer_id: PeerId,
        direction: Direction,
        stream: TcpStream,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> bool {
        let (read_half, write_half) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let writer = tokio::spawn(write_loop(peer_id, write_half, outbox_rx));
        let reader = tokio::spawn(read_loop(peer_id, read_half, events.clone(), ready_rx));

        let session = Session {
            peer_id,
            direction,
            outbox,
            reader: Some(reader),
            writer: Some(writer),
        };

        // The engine must learn about the session before its first message.
        if events.send(EngineEvent::Connected(session)).is_err() {
            return false;
        }
        let _ = ready_tx.send(());
        true
    }

    /// A session with no transport behind it; whatever is sent lands in `outbox`.
    #[cfg(test)]
    pub fn detached(
        peer_id: PeerId,
        direction: Direction,
        outbox: mpsc::UnboundedSender<PeerMessage>,
    ) -> Self {
        Self {
            peer_id,
            direction,
            outbox,
            reader: None,
            writer: None,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Queue a message for the writer. Returns false if the writer has stopped.
    pub fn send(&self, message: PeerMessage) -> bool {
        self.outbox.send(message).is_ok()
    }

    /// Stop reading, then give the writer a bounded time to flush.
    pub async fn shutdown(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let writer = self.writer.take();
        let peer_id = self.peer_id;
        drop(self);

        if let Some(writer) = writer {
            if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
                warn!("Writer for peer {} did not drain in time", peer_id);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Open a connection to `remote` and run the active side of the handshake
pub async fn connect(local: PeerId, remote: &PeerInfo) -> Result<TcpStream> {
    info!("Connecting to peer {} at {}", remote.id, remote.addr());

    let mut stream = TcpStream::connect((remote.host.as_str(), remote.port))
        .await
        .map_err(|e| {
            SwarmError::PeerError(format!("Failed to connect to {}: {}", remote.addr(), e))
        })?;

    protocol::initiate(&mut stream, local, remote.id).await?;

    debug!("Handshake with peer {} complete", remote.id);
    Ok(stream)
}

/// Accept one connection and run the passive side of the handshake.
///
/// `allowed` decides whether the id announced by the remote is one we expect.
pub async fn accept<F>(listener: &TcpListener, local: PeerId, allowed: F) -> Result<(PeerId, TcpStream)>
where
    F: FnOnce(PeerId) -> bool,
{
    let (mut stream, addr) = listener.accept().await?;
    debug!("Incoming connection from {}", addr);

    let remote = protocol::respond(&mut stream, local, allowed).await?;

    debug!("Handshake with peer {} ({}) complete", remote, addr);
    Ok((remote, stream))
}

/// Read one length-prefixed frame, prefix included
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;

    let length = u32::from_be_bytes(length_buf) as usize;
    if length < 5 || length > MAX_FRAME_LEN {
        return Err(SwarmError::MalformedFrame(format!(
            "declared length {} out of bounds",
            length
        )));
    }

    let mut frame = vec![0u8; length];
    frame[..4].copy_from_slice(&length_buf);
    reader.read_exact(&mut frame[4..]).await?;

    Ok(frame)
}

async fn read_loop(
    peer_id: PeerId,
    mut reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<EngineEvent>,
    ready: oneshot::Receiver<()>,
) {
    if ready.await.is_err() {
        return;
    }

    loop {
        let envelope = match read_frame(&mut reader).await {
            Ok(frame) => Envelope::parse(&frame, peer_id),
            Err(e) => Err(e),
        };

        match envelope {
            Ok(envelope) => {
                debug!("Received {} from peer {}", envelope.message.kind(), peer_id);
                if events.send(EngineEvent::Message(envelope)).is_err() {
                    return;
                }
            }
            Err(SwarmError::IoError(e)) => {
                info!("Connection to peer {} closed: {}", peer_id, e);
                break;
            }
            Err(e) => {
                warn!("Dropping session with peer {}: {}", peer_id, e);
                break;
            }
        }
    }

    let _ = events.send(EngineEvent::Disconnected(peer_id));
}

async fn write_loop(
    peer_id: PeerId,
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<PeerMessage>,
) {
    while let Some(message) = outbox.recv().await {
        if let Err(e) = writer.write_all(&message.to_bytes()).await {
            warn!("Failed to send {} to peer {}: {}", message.kind(), peer_id, e);
            return;
        }
        debug!("Sent {} to peer {}", message.kind(), peer_id);
    }

    let _ = writer.shutdown().await;
}
