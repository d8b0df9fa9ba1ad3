use crate::config::Config;
use crate::engine::{Engine, EngineEvent};
use crate::error::Result;
use crate::peer::{self, Direction, PeerId, PeerInfo, Session};
use crate::storage::FileStore;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Process-level settings that are not part of the shared configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding the `peer_<id>` subdirectories
    pub work_dir: PathBuf,
    pub connect_attempts: u32,
    pub connect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            connect_attempts: 10,
            connect_delay: Duration::from_secs(1),
        }
    }
}

/// One peer process: owns the listener, the outgoing connectors, the
/// scheduler timers and the engine loop
pub struct PeerClient {
    config: Config,
    local: PeerInfo,
    options: ClientConfig,
}

impl PeerClient {
    pub fn new(config: Config, local_id: PeerId, options: ClientConfig) -> Result<Self> {
        let local = config.peer(local_id)?.clone();
        info!(
            "Peer {} initialized ({}:{}, has file: {})",
            local.id, local.host, local.port, local.has_file
        );

        Ok(Self {
            config,
            local,
            options,
        })
    }

    /// Where this peer keeps its copy of the shared file
    pub fn store_path(&self) -> PathBuf {
        self.options
            .work_dir
            .join(format!("peer_{}", self.local.id))
            .join(&self.config.common.file_name)
    }

    /// Run until every peer in the swarm has the whole file
    pub async fn run(&self) -> Result<()> {
        let common = &self.config.common;
        let layout = common.layout();
        let store = FileStore::open(self.store_path(), layout, self.local.has_file).await?;

        let (events, queue) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        // Higher ids dial us; we dial lower ids.
        let expected: HashSet<PeerId> = self
            .config
            .peers
            .iter()
            .filter(|peer| peer.dials(&self.local))
            .map(|peer| peer.id)
            .collect();
        if !expected.is_empty() {
            let listener = TcpListener::bind(("0.0.0.0", self.local.port)).await?;
            info!("Listening on port {} for {} peers", self.local.port, expected.len());
            tasks.spawn(accept_loop(listener, self.local.id, expected, events.clone()));
        }

        for remote in self.config.peers.iter().filter(|peer| self.local.dials(peer)) {
            tasks.spawn(connect_with_retry(
                self.local.id,
                remote.clone(),
                self.options.connect_attempts,
                self.options.connect_delay,
                events.clone(),
            ));
        }

        tasks.spawn(tick(common.unchoking_interval, events.clone(), || {
            EngineEvent::RecomputePreferred
        }));
        tasks.spawn(tick(common.optimistic_unchoking_interval, events, || {
            EngineEvent::RotateOptimistic
        }));

        let engine = Engine::new(
            &self.local,
            self.config.peers.clone(),
            layout,
            common.preferred_neighbors,
            store,
        );
        let result = engine.run(queue).await;

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        info!("Peer {} stopped", self.local.id);
        result
    }
}

/// Accept sessions until every expected peer has connected once
async fn accept_loop(
    listener: TcpListener,
    local: PeerId,
    expected: HashSet<PeerId>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let mut connected = HashSet::new();

    while connected.len() < expected.len() {
        let allowed = |id: PeerId| expected.contains(&id) && !connected.contains(&id);
        match peer::accept(&listener, local, allowed).await {
            Ok((remote, stream)) => {
                connected.insert(remote);
                if !Session::spawn(remote, Direction::Inbound, stream, events.clone()) {
                    return;
                }
            }
            Err(e) => warn!("Rejected incoming connection: {}", e),
        }
    }

    info!("All {} expected peers have connected", expected.len());
}

async fn connect_with_retry(
    local: PeerId,
    remote: PeerInfo,
    attempts: u32,
    delay: Duration,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    for attempt in 1..=attempts {
        match peer::connect(local, &remote).await {
            Ok(stream) => {
                Session::spawn(remote.id, Direction::Outbound, stream, events);
                return;
            }
            Err(e) => {
                warn!(
                    "Attempt {}/{} to reach peer {} failed: {}",
                    attempt, attempts, remote.id, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    error!("Giving up on peer {} after {} attempts", remote.id, attempts);
}

/// Post an event every `period`, starting one period from now
async fn tick(
    period: Duration,
    events: mpsc::UnboundedSender<EngineEvent>,
    make: fn() -> EngineEvent,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;
        if events.send(make()).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommonConfig;
    use tempfile::TempDir;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_store_path() {
        let config = Config {
            common: CommonConfig {
                preferred_neighbors: 1,
                unchoking_interval: Duration::from_secs(5),
                optimistic_unchoking_interval: Duration::from_secs(10),
                file_name: "thefile".to_string(),
                file_size: 10,
                piece_size: 4,
            },
            peers: vec![PeerInfo::new(1001, "localhost", 6001, true)],
        };
        let options = ClientConfig {
            work_dir: PathBuf::from("/tmp/swarm"),
            ..ClientConfig::default()
        };

        let client = PeerClient::new(config.clone(), 1001, options).unwrap();
        assert_eq!(client.store_path(), PathBuf::from("/tmp/swarm/peer_1001/thefile"));
        assert!(PeerClient::new(config, 1002, ClientConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_two_peers_share_file_over_loopback() {
        let temp = TempDir::new().unwrap();
        let contents: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let seed_dir = temp.path().join("peer_1");
        tokio::fs::create_dir_all(&seed_dir).await.unwrap();
        tokio::fs::write(seed_dir.join("thefile"), &contents).await.unwrap();

        let config = Config {
            common: CommonConfig {
                preferred_neighbors: 1,
                unchoking_interval: Duration::from_millis(100),
                optimistic_unchoking_interval: Duration::from_millis(250),
                file_name: "thefile".to_string(),
                file_size: contents.len() as u64,
                piece_size: 128,
            },
            peers: vec![
                PeerInfo::new(1, "127.0.0.1", free_port().await, true),
                PeerInfo::new(2, "127.0.0.1", free_port().await, false),
            ],
        };
        let options = ClientConfig {
            work_dir: temp.path().to_path_buf(),
            connect_attempts: 50,
            connect_delay: Duration::from_millis(50),
        };

        let seeder = PeerClient::new(config.clone(), 1, options.clone()).unwrap();
        let leecher = PeerClient::new(config, 2, options).unwrap();

        let (seeded, leeched) = tokio::time::timeout(Duration::from_secs(30), async {
            tokio::join!(seeder.run(), leecher.run())
        })
        .await
        .unwrap();
        seeded.unwrap();
        leeched.unwrap();

        let copied = tokio::fs::read(temp.path().join("peer_2").join("thefile"))
            .await
            .unwrap();
        assert_eq!(copied, contents);
    }
}
