mod choker;
mod cli;
mod client;
mod config;
mod engine;
mod error;
mod peer;
mod piece;
mod storage;

use anyhow::Result;
use cli::Cli;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Protocol events also go to log_peer_<id>.log when running a peer
    let event_log = match cli.event_log_path() {
        Some(path) => Some(engine::log_file_layer::<Registry>(&path)?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(event_log)
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            ),
        )
        .init();

    cli.run().await?;

    Ok(())
}
