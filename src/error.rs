use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown message type: {0}")]
    UnknownType(u8),

    #[error("Bad payload size for {kind} message: {len} bytes")]
    BadPayloadSize { kind: &'static str, len: usize },

    #[error("Handshake mismatch: {0}")]
    HandshakeMismatch(String),

    #[error("Peer connection error: {0}")]
    PeerError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Message from unknown peer {0}")]
    UnknownPeer(u32),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
