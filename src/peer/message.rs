use super::PeerId;
use crate::error::{Result, SwarmError};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the length prefix plus the type byte.
pub const FRAME_HEADER_LEN: usize = 5;

/// Messages exchanged between peers once the handshake is done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Deny the receiver permission to request pieces
    Choke,
    /// Allow the receiver to request pieces
    Unchoke,
    /// Sender wants pieces the receiver has
    Interested,
    /// Sender wants nothing the receiver has
    NotInterested,
    /// Sender now owns a piece
    Have { piece_index: u32 },
    /// Packed ownership bits of the sender, most significant bit first
    Bitfield { bitfield: Vec<u8> },
    /// Ask the receiver for a whole piece
    Request { piece_index: u32 },
    /// Deliver a whole piece
    Piece { piece_index: u32, data: Vec<u8> },
}

impl PeerMessage {
    /// Message type IDs
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;

    fn type_id(&self) -> u8 {
        match self {
            PeerMessage::Choke => Self::CHOKE,
            PeerMessage::Unchoke => Self::UNCHOKE,
            PeerMessage::Interested => Self::INTERESTED,
            PeerMessage::NotInterested => Self::NOT_INTERESTED,
            PeerMessage::Have { .. } => Self::HAVE,
            PeerMessage::Bitfield { .. } => Self::BITFIELD,
            PeerMessage::Request { .. } => Self::REQUEST,
            PeerMessage::Piece { .. } => Self::PIECE,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => 0,
            PeerMessage::Have { .. } | PeerMessage::Request { .. } => 4,
            PeerMessage::Bitfield { bitfield } => bitfield.len(),
            PeerMessage::Piece { data, .. } => 4 + data.len(),
        }
    }

    /// Serialize message to bytes
    /// Format: <length><type><payload>, where length counts the whole frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let frame_len = FRAME_HEADER_LEN + self.payload_len();
        let mut buf = BytesMut::with_capacity(frame_len);

        buf.put_u32(frame_len as u32);
        buf.put_u8(self.type_id());

        match self {
            PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => {}
            PeerMessage::Have { piece_index } | PeerMessage::Request { piece_index } => {
                buf.put_u32(*piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                buf.put_slice(bitfield);
            }
            PeerMessage::Piece { piece_index, data } => {
                buf.put_u32(*piece_index);
                buf.put_slice(data);
            }
        }

        buf.to_vec()
    }

    /// Deserialize message from one complete frame
    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(SwarmError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {} byte header",
                data.len(),
                FRAME_HEADER_LEN
            )));
        }

        let actual = data.len();
        let declared = data.get_u32() as usize;
        if declared != actual {
            return Err(SwarmError::MalformedFrame(format!(
                "declared length {} but frame has {} bytes",
                declared, actual
            )));
        }

        let message_id = data.get_u8();

        match message_id {
            Self::CHOKE => Ok(PeerMessage::Choke),
            Self::UNCHOKE => Ok(PeerMessage::Unchoke),
            Self::INTERESTED => Ok(PeerMessage::Interested),
            Self::NOT_INTERESTED => Ok(PeerMessage::NotInterested),
            Self::HAVE => {
                let piece_index = read_index(&mut data, "have")?;
                Ok(PeerMessage::Have { piece_index })
            }
            Self::BITFIELD => {
                if data.is_empty() {
                    return Err(SwarmError::BadPayloadSize {
                        kind: "bitfield",
                        len: 0,
                    });
                }
                Ok(PeerMessage::Bitfield {
                    bitfield: data.to_vec(),
                })
            }
            Self::REQUEST => {
                let piece_index = read_index(&mut data, "request")?;
                Ok(PeerMessage::Request { piece_index })
            }
            Self::PIECE => {
                if data.len() < 4 {
                    return Err(SwarmError::BadPayloadSize {
                        kind: "piece",
                        len: data.len(),
                    });
                }
                let piece_index = data.get_u32();
                Ok(PeerMessage::Piece {
                    piece_index,
                    data: data.to_vec(),
                })
            }
            other => Err(SwarmError::UnknownType(other)),
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Choke => "choke",
            PeerMessage::Unchoke => "unchoke",
            PeerMessage::Interested => "interested",
            PeerMessage::NotInterested => "not interested",
            PeerMessage::Have { .. } => "have",
            PeerMessage::Bitfield { .. } => "bitfield",
            PeerMessage::Request { .. } => "request",
            PeerMessage::Piece { .. } => "piece",
        }
    }
}

fn read_index(data: &mut &[u8], kind: &'static str) -> Result<u32> {
    if data.len() != 4 {
        return Err(SwarmError::BadPayloadSize {
            kind,
            len: data.len(),
        });
    }
    Ok(data.get_u32())
}

/// A message together with the remote peer it came from or goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub peer: PeerId,
    pub message: PeerMessage,
}

impl Envelope {
    pub fn new(peer: PeerId, message: PeerMessage) -> Self {
        Self { peer, message }
    }

    /// Decode a frame received from `peer`
    pub fn parse(frame: &[u8], peer: PeerId) -> Result<Self> {
        Ok(Self::new(peer, PeerMessage::from_bytes(frame)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<PeerMessage> {
        vec![
            PeerMessage::Choke,
            PeerMessage::Unchoke,
            PeerMessage::Interested,
            PeerMessage::NotInterested,
            PeerMessage::Have { piece_index: 0x0102_0304 },
            PeerMessage::Bitfield {
                bitfield: vec![0b1010_0000, 0xff],
            },
            PeerMessage::Request { piece_index: 7 },
            PeerMessage::Piece {
                piece_index: 3,
                data: b"hello swarm".to_vec(),
            },
            PeerMessage::Piece {
                piece_index: 9,
                data: Vec::new(),
            },
        ]
    }

    #[test]
    fn test_round_trip_keeps_sender_and_payload() {
        for message in samples() {
            let envelope = Envelope::new(1002, message);
            let decoded = Envelope::parse(&envelope.message.to_bytes(), 1002).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_choke_serialization() {
        assert_eq!(PeerMessage::Choke.to_bytes(), vec![0, 0, 0, 5, 0]);
    }

    #[test]
    fn test_have_serialization_is_big_endian() {
        let bytes = PeerMessage::Have { piece_index: 258 }.to_bytes();
        assert_eq!(bytes, vec![0, 0, 0, 9, 4, 0, 0, 1, 2]);
    }

    #[test]
    fn test_length_counts_whole_frame() {
        let bytes = PeerMessage::Piece {
            piece_index: 1,
            data: vec![9; 10],
        }
        .to_bytes();
        assert_eq!(bytes.len(), 19);
        assert_eq!(&bytes[..4], &19u32.to_be_bytes());
    }

    #[test]
    fn test_declared_length_mismatch_is_malformed() {
        let err = PeerMessage::from_bytes(&[0, 0, 0, 12, 0]).unwrap_err();
        assert!(matches!(err, SwarmError::MalformedFrame(_)));

        let err = PeerMessage::from_bytes(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, SwarmError::MalformedFrame(_)));
    }

    #[test]
    fn test_unknown_type() {
        let err = PeerMessage::from_bytes(&[0, 0, 0, 5, 12]).unwrap_err();
        assert!(matches!(err, SwarmError::UnknownType(12)));
    }

    #[test]
    fn test_bad_payload_sizes() {
        let err = PeerMessage::from_bytes(&[0, 0, 0, 8, 4, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, SwarmError::BadPayloadSize { kind: "have", .. }));

        let err = PeerMessage::from_bytes(&[0, 0, 0, 10, 6, 0, 0, 0, 1, 0]).unwrap_err();
        assert!(matches!(err, SwarmError::BadPayloadSize { kind: "request", .. }));

        let err = PeerMessage::from_bytes(&[0, 0, 0, 7, 7, 0, 1]).unwrap_err();
        assert!(matches!(err, SwarmError::BadPayloadSize { kind: "piece", .. }));

        let err = PeerMessage::from_bytes(&[0, 0, 0, 5, 5]).unwrap_err();
        assert!(matches!(err, SwarmError::BadPayloadSize { kind: "bitfield", len: 0 }));
    }
}
