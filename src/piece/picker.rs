use super::Bitfield;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Pick the next piece to request from a peer.
///
/// Candidates are pieces the remote has, we lack, and nobody has an
/// outstanding request for. One is chosen uniformly at random so that
/// concurrent downloads from several peers rarely collide.
pub fn pick_piece<R, I>(remote: &Bitfield, local: &Bitfield, pending: I, rng: &mut R) -> Option<usize>
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = usize>,
{
    let in_flight: HashSet<usize> = pending.into_iter().collect();

    let candidates: Vec<usize> = remote
        .missing_from(local)
        .filter(|index| !in_flight.contains(index))
        .collect();

    candidates.choose(rng).copied()
}

/// Whether the remote owns anything we lack, regardless of in-flight requests
pub fn is_interesting(remote: &Bitfield, local: &Bitfield) -> bool {
    remote.missing_from(local).next().is_some()
}
