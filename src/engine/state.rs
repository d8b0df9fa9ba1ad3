use crate::choker::Candidate;
use crate::peer::{PeerId, PeerInfo};
use crate::piece::Bitfield;
use std::collections::{BTreeMap, HashSet};

/// Everything we track about one remote peer
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub info: PeerInfo,
    pub bitfield: Bitfield,
    /// They told us they want pieces we have
    pub interested_in_us: bool,
    /// We unchoked them at the last preferred-neighbor recompute
    pub preferred: bool,
    /// They are choking us
    pub choking_us: bool,
    /// The piece we asked them for and are still waiting on
    pub pending: Option<usize>,
    /// Pieces received from them during the current unchoking interval
    pub score: u32,
}

impl Neighbor {
    fn new(info: PeerInfo, num_pieces: usize) -> Self {
        let bitfield = if info.has_file {
            Bitfield::full(num_pieces)
        } else {
            Bitfield::new(num_pieces)
        };

        Self {
            info,
            bitfield,
            interested_in_us: false,
            preferred: false,
            choking_us: true,
            pending: None,
            score: 0,
        }
    }
}

/// State shared by the protocol handlers and the neighbor scheduler.
///
/// Owned by the engine loop, so every mutation is serialized through it.
#[derive(Debug, Clone)]
pub struct SwarmState {
    pub local_id: PeerId,
    pub local: Bitfield,
    pub neighbors: BTreeMap<PeerId, Neighbor>,
    /// Holder of the optimistic unchoke slot
    pub optimistic: Option<PeerId>,
}

impl SwarmState {
    pub fn new(local: &PeerInfo, peers: Vec<PeerInfo>, num_pieces: usize) -> Self {
        let local_bits = if local.has_file {
            Bitfield::full(num_pieces)
        } else {
            Bitfield::new(num_pieces)
        };

        let neighbors = peers
            .into_iter()
            .filter(|peer| peer.id != local.id)
            .map(|peer| (peer.id, Neighbor::new(peer, num_pieces)))
            .collect();

        Self {
            local_id: local.id,
            local: local_bits,
            neighbors,
            optimistic: None,
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.local.len()
    }

    pub fn neighbor(&self, id: PeerId) -> Option<&Neighbor> {
        self.neighbors.get(&id)
    }

    pub fn neighbor_mut(&mut self, id: PeerId) -> Option<&mut Neighbor> {
        self.neighbors.get_mut(&id)
    }

    /// Pieces requested from anyone and not yet delivered
    pub fn pending_pieces(&self) -> HashSet<usize> {
        self.neighbors.values().filter_map(|n| n.pending).collect()
    }

    /// Whether `id` may currently request pieces from us
    pub fn is_unchoked_by_us(&self, id: PeerId) -> bool {
        self.optimistic == Some(id) || self.neighbor(id).is_some_and(|n| n.preferred)
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.neighbors
            .values()
            .map(|n| Candidate {
                id: n.info.id,
                score: n.score,
                interested: n.interested_in_us,
                preferred: n.preferred,
            })
            .collect()
    }

    pub fn preferred_ids(&self) -> Vec<PeerId> {
        self.neighbors
            .values()
            .filter(|n| n.preferred)
            .map(|n| n.info.id)
            .collect()
    }

    pub fn reset_scores(&mut self) {
        for neighbor in self.neighbors.values_mut() {
            neighbor.score = 0;
        }
    }

    /// Every known peer, ourselves included, owns every piece
    pub fn swarm_complete(&self) -> bool {
        self.local.is_complete() && self.neighbors.values().all(|n| n.bitfield.is_complete())
    }
}
