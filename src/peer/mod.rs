mod connection;
mod message;
mod protocol;

pub use connection::{accept, connect, Direction, Session};
pub use message::{Envelope, PeerMessage};

/// Numeric peer id, as carried in the handshake
pub type PeerId = u32;

/// Static identity of a peer, read once from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
    /// Whether the peer starts out with the complete file
    pub has_file: bool,
}

impl PeerInfo {
    pub fn new(id: PeerId, host: impl Into<String>, port: u16, has_file: bool) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            has_file,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The higher id opens the connection, the lower id accepts it
    pub fn dials(&self, other: &PeerInfo) -> bool {
        self.id > other.id
    }
}
