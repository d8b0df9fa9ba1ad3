//! Discrete protocol events, emitted under the `swarm::events` target so a
//! subscriber can route them to a per-peer log.

use crate::peer::{Direction, PeerId};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, Level, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::{self, format, time::ChronoLocal};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const TARGET: &str = "swarm::events";

const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// A layer appending these events, and nothing else, to the log at `path`.
///
/// Lines carry a local timestamp and the message text only.
pub fn log_file_layer<S>(path: &Path) -> io::Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let message_only = format::debug_fn(|writer, field, value| {
        if field.name() == "message" {
            write!(writer, "{:?}", value)
        } else {
            Ok(())
        }
    });

    Ok(fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_level(false)
        .with_target(false)
        .with_timer(ChronoLocal::new(TIMESTAMP.to_string()))
        .fmt_fields(message_only)
        .with_filter(Targets::new().with_target(TARGET, Level::INFO)))
}

pub fn connection_established(local: PeerId, remote: PeerId, direction: Direction) {
    match direction {
        Direction::Outbound => info!(target: TARGET, local, remote, "Peer {} makes a connection to Peer {}", local, remote),
        Direction::Inbound => info!(target: TARGET, local, remote, "Peer {} is connected from Peer {}", local, remote),
    }
}

pub fn preferred_neighbors_changed(local: PeerId, neighbors: &[PeerId]) {
    let list = neighbors
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    info!(target: TARGET, local, neighbors = %list, "Peer {} has the preferred neighbors [{}]", local, list);
}

pub fn optimistic_unchoke_changed(local: PeerId, remote: PeerId) {
    info!(target: TARGET, local, remote, "Peer {} has the optimistically unchoked neighbor {}", local, remote);
}

pub fn unchoked_by(local: PeerId, remote: PeerId) {
    info!(target: TARGET, local, remote, "Peer {} is unchoked by {}", local, remote);
}

pub fn choked_by(local: PeerId, remote: PeerId) {
    info!(target: TARGET, local, remote, "Peer {} is choked by {}", local, remote);
}

pub fn interested_received(local: PeerId, remote: PeerId) {
    info!(target: TARGET, local, remote, "Peer {} received the 'interested' message from {}", local, remote);
}

pub fn not_interested_received(local: PeerId, remote: PeerId) {
    info!(target: TARGET, local, remote, "Peer {} received the 'not interested' message from {}", local, remote);
}

pub fn have_received(local: PeerId, remote: PeerId, piece: usize) {
    info!(target: TARGET, local, remote, piece, "Peer {} received the 'have' message from {} for the piece {}", local, remote, piece);
}

pub fn piece_downloaded(local: PeerId, remote: PeerId, piece: usize, total: usize) {
    info!(
        target: TARGET,
        local,
        remote,
        piece,
        total,
        "Peer {} has downloaded the piece {} from {}. Now the number of pieces it has is {}",
        local,
        piece,
        remote,
        total
    );
}

pub fn download_complete(local: PeerId) {
    info!(target: TARGET, local, "Peer {} has downloaded the complete file", local);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[test]
    fn test_events_land_in_log_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log_peer_1001.log");
        let subscriber = tracing_subscriber::registry().with(log_file_layer::<Registry>(&path).unwrap());

        tracing::subscriber::with_default(subscriber, || {
            choked_by(1001, 1002);
            info!("Unrelated lifecycle message");
            piece_downloaded(1001, 1002, 7, 3);
        });

        let log = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Peer 1001 is choked by 1002"));
        assert!(lines[1].ends_with(
            "Peer 1001 has downloaded the piece 7 from 1002. Now the number of pieces it has is 3"
        ));

        // yyyy-mm-dd hh:mm:ss
        let stamp = lines[0].as_bytes();
        assert_eq!((stamp[4], stamp[7], stamp[10], stamp[13], stamp[16]), (b'-', b'-', b' ', b':', b':'));
    }

    #[test]
    fn test_log_file_is_appended() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("peer_1").join("log_peer_1.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "earlier run\n").unwrap();

        let subscriber = tracing_subscriber::registry().with(log_file_layer::<Registry>(&path).unwrap());
        tracing::subscriber::with_default(subscriber, || download_complete(1));

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.starts_with("earlier run\n"));
        assert!(log.trim_end().ends_with("Peer 1 has downloaded the complete file"));
    }
}
