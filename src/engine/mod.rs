//! The protocol state machine.
//!
//! Every input (decoded messages, session lifecycle, scheduler ticks) goes
//! through one queue and is handled to completion before the next, so the
//! swarm state needs no locking.

mod events;
mod state;

pub use events::log_file_layer;
pub use state::SwarmState;

use crate::choker;
use crate::error::{Result, SwarmError};
use crate::peer::{Envelope, PeerId, PeerInfo, PeerMessage, Session};
use crate::piece::{is_interesting, pick_piece, Bitfield, PieceLayout};
use crate::storage::PieceStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Inputs to the engine loop
#[derive(Debug)]
pub enum EngineEvent {
    /// A handshaked session is ready to carry messages
    Connected(Session),
    /// A message decoded by a session reader
    Message(Envelope),
    /// A session reader stopped
    Disconnected(PeerId),
    /// Unchoking interval elapsed
    RecomputePreferred,
    /// Optimistic unchoking interval elapsed
    RotateOptimistic,
}

pub struct Engine<S> {
    state: SwarmState,
    preferred_count: usize,
    sessions: HashMap<PeerId, Session>,
    store: S,
    rng: StdRng,
    announced_complete: bool,
}

impl<S: PieceStore> Engine<S> {
    pub fn new(
        local: &PeerInfo,
        peers: Vec<PeerInfo>,
        layout: PieceLayout,
        preferred_count: usize,
        store: S,
    ) -> Self {
        Self {
            state: SwarmState::new(local, peers, layout.num_pieces()),
            preferred_count,
            sessions: HashMap::new(),
            store,
            rng: StdRng::from_entropy(),
            announced_complete: local.has_file,
        }
    }

    /// Replace the random source, for reproducible runs
    #[cfg(test)]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &SwarmState {
        &self.state
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Self and every known peer hold the whole file
    pub fn is_done(&self) -> bool {
        self.state.swarm_complete()
    }

    /// Consume events until the swarm is complete.
    ///
    /// Only invariant violations end the loop early. Either way every open
    /// session is shut down before returning.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<EngineEvent>) -> Result<()> {
        info!(
            "Peer {} running with {} neighbors and {} pieces",
            self.state.local_id,
            self.state.neighbors.len(),
            self.state.num_pieces()
        );

        let outcome = loop {
            if self.is_done() {
                info!("All peers have the complete file");
                break Ok(());
            }

            let Some(event) = events.recv().await else {
                warn!("Event queue closed before the swarm completed");
                break Ok(());
            };

            if let Err(e) = self.handle_event(event).await {
                error!("Terminating: {}", e);
                break Err(e);
            }
        };

        drop(events);
        self.shutdown().await;
        outcome
    }

    pub async fn handle_event(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::Connected(session) => self.on_connected(session)?,
            EngineEvent::Message(envelope) => self.on_message(envelope).await?,
            EngineEvent::Disconnected(peer) => self.on_disconnected(peer),
            EngineEvent::RecomputePreferred => self.recompute_preferred(),
            EngineEvent::RotateOptimistic => self.rotate_optimistic(),
        }

        if !self.announced_complete && self.state.local.is_complete() {
            self.announced_complete = true;
            events::download_complete(self.state.local_id);
        }

        Ok(())
    }

    async fn shutdown(&mut self) {
        let mut closing = JoinSet::new();
        for (_, session) in self.sessions.drain() {
            closing.spawn(session.shutdown());
        }
        while closing.join_next().await.is_some() {}
    }

    fn send(&self, peer: PeerId, message: PeerMessage) {
        match self.sessions.get(&peer) {
            Some(session) => {
                if !session.send(message) {
                    debug!("Session with peer {} is closed", peer);
                }
            }
            None => debug!("No session with peer {}, dropping {}", peer, message.kind()),
        }
    }

    fn on_connected(&mut self, session: Session) -> Result<()> {
        let peer = session.peer_id();
        if self.state.neighbor(peer).is_none() {
            return Err(SwarmError::UnknownPeer(peer));
        }

        events::connection_established(self.state.local_id, peer, session.direction());

        if self.state.local.count() > 0 {
            session.send(PeerMessage::Bitfield {
                bitfield: self.state.local.to_bytes(),
            });
        }

        if self.sessions.insert(peer, session).is_some() {
            debug!("Replaced existing session with peer {}", peer);
        }
        Ok(())
    }

    fn on_disconnected(&mut self, peer: PeerId) {
        self.sessions.remove(&peer);

        // An unreachable peer no longer competes for our unchoke slots.
        if let Some(neighbor) = self.state.neighbor_mut(peer) {
            neighbor.choking_us = true;
            neighbor.interested_in_us = false;
            neighbor.preferred = false;
            if let Some(index) = neighbor.pending.take() {
                info!("Abandoned request for piece {} to unreachable peer {}", index, peer);
            }
        }
        if self.state.optimistic == Some(peer) {
            self.state.optimistic = None;
        }
        info!("Peer {} is unreachable", peer);
    }

    async fn on_message(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope { peer, message } = envelope;
        if self.state.neighbor(peer).is_none() {
            return Err(SwarmError::UnknownPeer(peer));
        }

        match message {
            PeerMessage::Choke => self.on_choke(peer),
            PeerMessage::Unchoke => self.on_unchoke(peer),
            PeerMessage::Interested => self.on_interest(peer, true),
            PeerMessage::NotInterested => self.on_interest(peer, false),
            PeerMessage::Have { piece_index } => self.on_have(peer, piece_index as usize),
            PeerMessage::Bitfield { bitfield } => self.on_bitfield(peer, &bitfield),
            PeerMessage::Request { piece_index } => {
                self.on_request(peer, piece_index as usize).await
            }
            PeerMessage::Piece { piece_index, data } => {
                self.on_piece(peer, piece_index as usize, data).await
            }
        }

        Ok(())
    }

    fn on_choke(&mut self, peer: PeerId) {
        let Some(neighbor) = self.state.neighbor_mut(peer) else {
            return;
        };

        neighbor.choking_us = true;
        if let Some(index) = neighbor.pending.take() {
            debug!("Request for piece {} to peer {} will not be served", index, peer);
        }
        events::choked_by(self.state.local_id, peer);
    }

    fn on_unchoke(&mut self, peer: PeerId) {
        let Some(neighbor) = self.state.neighbor_mut(peer) else {
            return;
        };

        neighbor.choking_us = false;
        events::unchoked_by(self.state.local_id, peer);
        self.request_next(peer);
    }

    /// Ask `peer` for another piece, or tell it we want nothing more
    fn request_next(&mut self, peer: PeerId) {
        let pending = self.state.pending_pieces();
        let Some(neighbor) = self.state.neighbor(peer) else {
            return;
        };

        if let Some(index) = neighbor.pending {
            debug!("Still waiting on piece {} from peer {}", index, peer);
            return;
        }

        match pick_piece(&neighbor.bitfield, &self.state.local, pending, &mut self.rng) {
            Some(index) => {
                if let Some(neighbor) = self.state.neighbor_mut(peer) {
                    neighbor.pending = Some(index);
                }
                debug!("Requesting piece {} from peer {}", index, peer);
                self.send(peer, PeerMessage::Request {
                    piece_index: index as u32,
                });
            }
            None => self.send(peer, PeerMessage::NotInterested),
        }
    }

    fn on_interest(&mut self, peer: PeerId, interested: bool) {
        let Some(neighbor) = self.state.neighbor_mut(peer) else {
            return;
        };

        if neighbor.interested_in_us == interested {
            debug!("Peer {} repeated its interest state ({})", peer, interested);
        }
        neighbor.interested_in_us = interested;

        if interested {
            events::interested_received(self.state.local_id, peer);
        } else {
            events::not_interested_received(self.state.local_id, peer);
        }
    }

    fn on_have(&mut self, peer: PeerId, index: usize) {
        let pending = self.state.pending_pieces();
        let Some(neighbor) = self.state.neighbor_mut(peer) else {
            return;
        };

        if !neighbor.bitfield.set(index) {
            warn!("Peer {} announced out-of-range piece {}", peer, index);
            return;
        }
        events::have_received(self.state.local_id, peer, index);

        let Some(neighbor) = self.state.neighbor(peer) else {
            return;
        };
        if !self.state.local.has(index) {
            self.send(peer, PeerMessage::Interested);
        } else if pick_piece(&neighbor.bitfield, &self.state.local, pending, &mut self.rng).is_none() {
            self.send(peer, PeerMessage::NotInterested);
        }
    }

    fn on_bitfield(&mut self, peer: PeerId, bytes: &[u8]) {
        let num_pieces = self.state.num_pieces();
        if bytes.len() != num_pieces.div_ceil(8) {
            warn!(
                "Ignoring bitfield of {} bytes from peer {}, expected {}",
                bytes.len(),
                peer,
                num_pieces.div_ceil(8)
            );
            return;
        }

        if let Some(neighbor) = self.state.neighbor_mut(peer) {
            neighbor.bitfield = Bitfield::from_bytes(bytes, num_pieces);
        }
        let Some(neighbor) = self.state.neighbor(peer) else {
            return;
        };
        debug!("Peer {} has {} of {} pieces", peer, neighbor.bitfield.count(), num_pieces);

        let reply = if is_interesting(&neighbor.bitfield, &self.state.local) {
            PeerMessage::Interested
        } else {
            PeerMessage::NotInterested
        };
        self.send(peer, reply);
    }

    async fn on_request(&mut self, peer: PeerId, index: usize) {
        if !self.state.is_unchoked_by_us(peer) {
            debug!("Ignoring request for piece {} from choked peer {}", index, peer);
            return;
        }
        if index >= self.state.num_pieces() {
            warn!("Ignoring request for out-of-range piece {} from peer {}", index, peer);
            return;
        }
        if !self.state.local.has(index) {
            warn!("Ignoring request for piece {} we do not have from peer {}", index, peer);
            return;
        }

        match self.store.read_piece(index).await {
            Ok(data) => {
                debug!("Sending piece {} to peer {}", index, peer);
                self.send(peer, PeerMessage::Piece {
                    piece_index: index as u32,
                    data,
                });
            }
            Err(e) => warn!("Could not read piece {} for peer {}: {}", index, peer, e),
        }
    }

    async fn on_piece(&mut self, peer: PeerId, index: usize, data: Vec<u8>) {
        let Some(neighbor) = self.state.neighbor(peer) else {
            return;
        };

        if neighbor.pending != Some(index) {
            warn!(
                "Rejecting piece {} from peer {}: outstanding request is {:?}",
                index, peer, neighbor.pending
            );
            return;
        }
        if self.state.local.has(index) {
            warn!("Rejecting piece {} from peer {}: already have it", index, peer);
            return;
        }

        match self.store.write_piece(index, &data).await {
            Ok(()) => self.accept_piece(peer, index),
            Err(e) => {
                warn!("Could not store piece {} from peer {}: {}", index, peer, e);
                if let Some(neighbor) = self.state.neighbor_mut(peer) {
                    neighbor.pending = None;
                }
            }
        }

        let choked = self.state.neighbor(peer).map_or(true, |n| n.choking_us);
        if !choked {
            self.request_next(peer);
        }
    }

    /// Record a stored piece and tell everyone about it
    fn accept_piece(&mut self, peer: PeerId, index: usize) {
        let interesting_before: Vec<PeerId> = self
            .state
            .neighbors
            .values()
            .filter(|n| is_interesting(&n.bitfield, &self.state.local))
            .map(|n| n.info.id)
            .collect();

        let mut sender_choking_us = true;
        if let Some(neighbor) = self.state.neighbor_mut(peer) {
            neighbor.pending = None;
            neighbor.score += 1;
            sender_choking_us = neighbor.choking_us;
        }
        self.state.local.set(index);

        events::piece_downloaded(self.state.local_id, peer, index, self.state.local.count());

        for &id in self.state.neighbors.keys() {
            self.send(id, PeerMessage::Have {
                piece_index: index as u32,
            });
        }

        for id in interesting_before {
            // An unchoked sender hears NotInterested from request_next instead.
            if id == peer && !sender_choking_us {
                continue;
            }
            let still_interesting = self
                .state
                .neighbor(id)
                .is_some_and(|n| is_interesting(&n.bitfield, &self.state.local));
            if !still_interesting {
                self.send(id, PeerMessage::NotInterested);
            }
        }
    }

    fn recompute_preferred(&mut self) {
        let altruistic = self.state.local.is_complete();
        let next = choker::select_preferred(
            &self.state.candidates(),
            self.preferred_count,
            altruistic,
            &mut self.rng,
        );
        let previous: BTreeSet<PeerId> = self.state.preferred_ids().into_iter().collect();
        let changes = choker::transitions(&previous, &next, self.state.optimistic);

        for neighbor in self.state.neighbors.values_mut() {
            neighbor.preferred = next.contains(&neighbor.info.id);
        }
        for &id in &changes.unchoke {
            self.send(id, PeerMessage::Unchoke);
        }
        for &id in &changes.choke {
            self.send(id, PeerMessage::Choke);
        }

        if previous != next {
            let neighbors: Vec<PeerId> = next.into_iter().collect();
            events::preferred_neighbors_changed(self.state.local_id, &neighbors);
        }

        self.state.reset_scores();
    }

    fn rotate_optimistic(&mut self) {
        let rotation = choker::rotate_optimistic(
            &self.state.candidates(),
            self.state.optimistic,
            &mut self.rng,
        );
        let Some(rotation) = rotation else {
            debug!("No candidate for the optimistic unchoke slot");
            return;
        };

        if let Some(previous) = rotation.choke {
            self.send(previous, PeerMessage::Choke);
        }
        self.send(rotation.unchoke, PeerMessage::Unchoke);
        self.state.optimistic = Some(rotation.unchoke);

        events::optimistic_unchoke_changed(self.state.local_id, rotation.unchoke);
    }
}
