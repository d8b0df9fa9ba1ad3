use super::fields;
use crate::error::{Result, SwarmError};
use crate::peer::{PeerId, PeerInfo};
use std::collections::HashSet;

/// Parse `PeerInfo.cfg`: one `id host port hasFile` line per peer, in file order
pub fn parse_peers(text: &str) -> Result<Vec<PeerInfo>> {
    let mut peers = Vec::new();
    let mut seen = HashSet::new();

    for (number, line) in text.lines().enumerate() {
        let Some(fields) = fields(line) else {
            continue;
        };
        let bad = |what: &str| {
            SwarmError::ConfigError(format!("Line {}: {} in {:?}", number + 1, what, line.trim()))
        };

        let [id, host, port, has_file] = fields[..] else {
            return Err(bad("expected `id host port hasFile`"));
        };

        let id: PeerId = id.parse().map_err(|_| bad("bad peer id"))?;
        let port: u16 = port.parse().map_err(|_| bad("bad port"))?;
        let has_file = match has_file {
            "1" => true,
            "0" => false,
            _ => return Err(bad("hasFile must be 1 or 0")),
        };

        if !seen.insert(id) {
            return Err(bad("duplicate peer id"));
        }
        peers.push(PeerInfo::new(id, host, port, has_file));
    }

    Ok(peers)
}
