mod common;
mod peers;

pub use common::CommonConfig;
pub use peers::parse_peers;

use crate::error::{Result, SwarmError};
use crate::peer::{PeerId, PeerInfo};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Everything a peer process needs to know before it starts
#[derive(Debug, Clone)]
pub struct Config {
    pub common: CommonConfig,
    pub peers: Vec<PeerInfo>,
}

impl Config {
    pub async fn load<P: AsRef<Path>, Q: AsRef<Path>>(common: P, peers: Q) -> Result<Self> {
        let common = load_common(common).await?;
        let peers = load_peers(peers).await?;
        Ok(Self { common, peers })
    }

    /// The entry for `id` in the peer list
    pub fn peer(&self, id: PeerId) -> Result<&PeerInfo> {
        self.peers
            .iter()
            .find(|peer| peer.id == id)
            .ok_or_else(|| SwarmError::ConfigError(format!("Peer {} is not in the peer list", id)))
    }
}

pub async fn load_common<P: AsRef<Path>>(path: P) -> Result<CommonConfig> {
    let text = read_config(path.as_ref()).await?;
    CommonConfig::parse(&text)
}

pub async fn load_peers<P: AsRef<Path>>(path: P) -> Result<Vec<PeerInfo>> {
    let text = read_config(path.as_ref()).await?;
    parse_peers(&text)
}

async fn read_config(path: &Path) -> Result<String> {
    debug!("Reading configuration from {}", path.display());
    fs::read_to_string(path).await.map_err(|e| {
        SwarmError::ConfigError(format!("Could not read {}: {}", path.display(), e))
    })
}

/// Split a config line into fields, or None for blank lines and comments
fn fields(line: &str) -> Option<Vec<&str>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line.split_whitespace().collect())
}
