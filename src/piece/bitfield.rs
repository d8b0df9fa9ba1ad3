/// Per-peer piece ownership.
///
/// Bits only ever go from false to true, except when a peer's whole
/// bitfield is replaced by a Bitfield message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<bool>,
}

impl Bitfield {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            bits: vec![false; num_pieces],
        }
    }

    pub fn full(num_pieces: usize) -> Self {
        Self {
            bits: vec![true; num_pieces],
        }
    }

    #[cfg(test)]
    pub fn from_bools(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    /// Decode packed bits, bit `i` being the most significant bit of byte `i / 8`
    /// counted downwards. Trailing bits past `num_pieces` are ignored; a short
    /// payload leaves the remaining pieces unset.
    pub fn from_bytes(bytes: &[u8], num_pieces: usize) -> Self {
        let bits = (0..num_pieces)
            .map(|index| {
                bytes
                    .get(index / 8)
                    .map(|byte| (byte >> (7 - index % 8)) & 1 == 1)
                    .unwrap_or(false)
            })
            .collect();
        Self { bits }
    }

    /// Pack into `ceil(len / 8)` bytes, most significant bit first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.bits.len().div_ceil(8)];
        for (index, _) in self.bits.iter().enumerate().filter(|(_, &has)| has) {
            bytes[index / 8] |= 1 << (7 - index % 8);
        }
        bytes
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn has(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    /// Returns false if `index` is out of range
    pub fn set(&mut self, index: usize) -> bool {
        match self.bits.get_mut(index) {
            Some(bit) => {
                *bit = true;
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&has| has).count()
    }

    pub fn is_complete(&self) -> bool {
        self.bits.iter().all(|&has| has)
    }

    /// Indices set here and unset in `other`
    pub fn missing_from<'a>(&'a self, other: &'a Bitfield) -> impl Iterator<Item = usize> + 'a {
        self.bits
            .iter()
            .enumerate()
            .filter(move |(index, &has)| has && !other.has(*index))
            .map(|(index, _)| index)
    }
}
