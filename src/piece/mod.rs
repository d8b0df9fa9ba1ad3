mod bitfield;
mod picker;

pub use bitfield::Bitfield;
pub use picker::{is_interesting, pick_piece};

/// How the shared file is cut into pieces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    pub piece_size: u64,
    pub file_size: u64,
}

impl PieceLayout {
    pub fn new(piece_size: u64, file_size: u64) -> Self {
        Self {
            piece_size,
            file_size,
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.file_size.div_ceil(self.piece_size) as usize
    }

    /// Length of the piece at `index`; the last piece might be smaller
    pub fn piece_len(&self, index: usize) -> Option<u64> {
        let count = self.num_pieces();
        if index >= count {
            return None;
        }

        if index == count - 1 {
            Some(self.file_size - (count as u64 - 1) * self.piece_size)
        } else {
            Some(self.piece_size)
        }
    }

    pub fn offset(&self, index: usize) -> u64 {
        index as u64 * self.piece_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_with_short_last_piece() {
        let layout = PieceLayout::new(16384, 2_167_705);
        assert_eq!(layout.num_pieces(), 133);
        assert_eq!(layout.piece_len(0), Some(16384));
        assert_eq!(layout.piece_len(132), Some(2_167_705 - 132 * 16384));
        assert_eq!(layout.piece_len(133), None);
    }

    #[test]
    fn test_layout_exact_multiple() {
        let layout = PieceLayout::new(10, 30);
        assert_eq!(layout.num_pieces(), 3);
        assert_eq!(layout.piece_len(2), Some(10));
        assert_eq!(layout.offset(2), 20);
    }
}
