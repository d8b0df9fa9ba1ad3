use crate::client::{ClientConfig, PeerClient};
use crate::config::Config;
use crate::error::Result;
use crate::peer::PeerId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "swarm-peer")]
#[command(about = "A peer in a swarm-style file distribution network", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a peer until every peer in the swarm has the file
    Run {
        /// Id of this peer in the peer list
        peer_id: PeerId,

        /// Path to the common configuration
        #[arg(short, long, default_value = "Common.cfg")]
        common: PathBuf,

        /// Path to the peer list
        #[arg(short, long, default_value = "PeerInfo.cfg")]
        peers: PathBuf,

        /// Directory holding the peer_<id> directories
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Show the parsed configuration
    Info {
        /// Path to the common configuration
        #[arg(short, long, default_value = "Common.cfg")]
        common: PathBuf,

        /// Path to the peer list
        #[arg(short, long, default_value = "PeerInfo.cfg")]
        peers: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Per-peer event log, `<dir>/log_peer_<id>.log`, for the `run` command
    pub fn event_log_path(&self) -> Option<PathBuf> {
        match &self.command {
            Commands::Run { peer_id, dir, .. } => {
                Some(dir.join(format!("log_peer_{}.log", peer_id)))
            }
            Commands::Info { .. } => None,
        }
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                peer_id,
                common,
                peers,
                dir,
            } => {
                let config = Config::load(common, peers).await?;
                let options = ClientConfig {
                    work_dir: dir.clone(),
                    ..ClientConfig::default()
                };

                let client = PeerClient::new(config, *peer_id, options)?;
                client.run().await?;
            }

            Commands::Info { common, peers } => {
                let config = Config::load(common, peers).await?;
                self.show_config_info(&config);
            }
        }

        Ok(())
    }

    fn show_config_info(&self, config: &Config) {
        let common = &config.common;
        let layout = common.layout();
        let last = layout.num_pieces().saturating_sub(1);

        println!("Swarm Configuration");
        println!("===================");
        println!("File: {}", common.file_name);
        println!("Total Size: {} bytes", common.file_size);
        println!("Piece Size: {} bytes", common.piece_size);
        println!("Number of Pieces: {}", layout.num_pieces());
        if let Some(len) = layout.piece_len(last) {
            println!("Last Piece: {} bytes", len);
        }
        println!("Preferred Neighbors: {}", common.preferred_neighbors);
        println!("Unchoking Interval: {}s", common.unchoking_interval.as_secs());
        println!(
            "Optimistic Unchoking Interval: {}s",
            common.optimistic_unchoking_interval.as_secs()
        );
        println!("\nPeers:");

        for peer in &config.peers {
            println!(
                "  {} at {}{}",
                peer.id,
                peer.addr(),
                if peer.has_file { " (has file)" } else { "" }
            );
        }
    }
}
