//! Neighbor selection: which peers we let download from us.
//!
//! Every unchoking interval the preferred set is recomputed from how much
//! each peer gave us since the last recompute. Independently, one extra
//! interested peer is rotated through the optimistic slot.

use crate::peer::PeerId;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;

/// What the selector needs to know about one neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: PeerId,
    /// Pieces received from this peer in the current interval
    pub score: u32,
    pub interested: bool,
    pub preferred: bool,
}

/// Messages to send after a preferred-set recompute
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transitions {
    pub unchoke: Vec<PeerId>,
    pub choke: Vec<PeerId>,
}

/// Outcome of an optimistic rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    pub unchoke: PeerId,
    /// Previous holder, if it lost its only reason to be unchoked
    pub choke: Option<PeerId>,
}

/// Choose up to `count` preferred neighbors among interested candidates.
///
/// Ranked by score, highest first, with ties in uniformly random order. In
/// altruistic mode (we already have the whole file) scores are ignored and
/// the choice is uniformly random.
pub fn select_preferred<R: Rng + ?Sized>(
    candidates: &[Candidate],
    count: usize,
    altruistic: bool,
    rng: &mut R,
) -> BTreeSet<PeerId> {
    let mut ranked: Vec<&Candidate> = candidates.iter().filter(|c| c.interested).collect();
    ranked.shuffle(rng);

    if !altruistic {
        // Stable sort: equal scores keep their shuffled order.
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
    }

    ranked.into_iter().take(count).map(|c| c.id).collect()
}

/// Diff the old and new preferred sets.
///
/// Every newly preferred peer is unchoked, even the optimistic holder. The
/// holder is never choked when it drops out of the preferred set.
pub fn transitions(
    previous: &BTreeSet<PeerId>,
    next: &BTreeSet<PeerId>,
    optimistic: Option<PeerId>,
) -> Transitions {
    let unchoke = next.difference(previous).copied().collect();
    let choke = previous
        .difference(next)
        .copied()
        .filter(|&id| Some(id) != optimistic)
        .collect();

    Transitions { unchoke, choke }
}

/// Peers that may take the optimistic slot: interested, not preferred, not the current holder
pub fn optimistic_candidates(candidates: &[Candidate], current: Option<PeerId>) -> Vec<PeerId> {
    candidates
        .iter()
        .filter(|c| c.interested && !c.preferred && Some(c.id) != current)
        .map(|c| c.id)
        .collect()
}

/// Pick a new optimistic holder, or None to leave the slot as it is
pub fn rotate_optimistic<R: Rng + ?Sized>(
    candidates: &[Candidate],
    current: Option<PeerId>,
    rng: &mut R,
) -> Option<Rotation> {
    let unchoke = *optimistic_candidates(candidates, current).choose(rng)?;

    let choke = current.filter(|&holder| {
        !candidates
            .iter()
            .any(|c| c.id == holder && c.preferred)
    });

    Some(Rotation { unchoke, choke })
}
