use super::PeerId;
use crate::error::{Result, SwarmError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HANDSHAKE_HEADER: &[u8; 18] = b"P2PFILESHARINGPROJ";
pub const HANDSHAKE_LEN: usize = 32;

const PADDING: std::ops::Range<usize> = 18..28;

/// Handshake exchanged once per session before any message
/// Format: <header><10 zero bytes><peer id>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    /// Serialize handshake to bytes
    /// Total: 18 + 10 + 4 = 32 bytes
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[..PADDING.start].copy_from_slice(HANDSHAKE_HEADER);
        buf[PADDING.end..].copy_from_slice(&self.peer_id.to_be_bytes());
        buf
    }

    /// Deserialize handshake from bytes, checking header and padding
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != HANDSHAKE_LEN {
            return Err(SwarmError::HandshakeMismatch(format!(
                "expected {} bytes, got {}",
                HANDSHAKE_LEN,
                data.len()
            )));
        }

        if &data[..PADDING.start] != HANDSHAKE_HEADER {
            return Err(SwarmError::HandshakeMismatch(
                "invalid header".to_string(),
            ));
        }

        if data[PADDING].iter().any(|&b| b != 0) {
            return Err(SwarmError::HandshakeMismatch(
                "non-zero padding".to_string(),
            ));
        }

        let mut id = [0u8; 4];
        id.copy_from_slice(&data[PADDING.end..]);

        Ok(Handshake {
            peer_id: PeerId::from_be_bytes(id),
        })
    }

    /// Decode and require the handshake to come from `expected`
    pub fn validate(data: &[u8], expected: PeerId) -> Result<Self> {
        let handshake = Self::from_bytes(data)?;
        if handshake.peer_id != expected {
            return Err(SwarmError::HandshakeMismatch(format!(
                "expected peer {}, got {}",
                expected, handshake.peer_id
            )));
        }
        Ok(handshake)
    }
}

pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    reader.read_exact(&mut buf).await?;
    Handshake::from_bytes(&buf)
}

pub async fn write_handshake<W: AsyncWrite + Unpin>(writer: &mut W, local: PeerId) -> Result<()> {
    writer.write_all(&Handshake::new(local).to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Active side: send first, then wait for the reply from `expected`
pub async fn initiate<S>(stream: &mut S, local: PeerId, expected: PeerId) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_handshake(stream, local).await?;
    let mut reply = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut reply).await?;
    Handshake::validate(&reply, expected)?;
    Ok(())
}

/// Passive side: receive first, accept only ids `allowed` says yes to, then reply
pub async fn respond<S, F>(stream: &mut S, local: PeerId, allowed: F) -> Result<PeerId>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(PeerId) -> bool,
{
    let remote = read_handshake(stream).await?;
    if !allowed(remote.peer_id) {
        return Err(SwarmError::HandshakeMismatch(format!(
            "unexpected peer {}",
            remote.peer_id
        )));
    }
    write_handshake(stream, local).await?;
    Ok(remote.peer_id)
}
