//! Memory Match Game Server
//!
//! Authoritative WebSocket server for the memory-match game.
//! Configuration comes from the environment; runs until Ctrl-C.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use memory_match::{GameServer, ServerConfig, VERSION};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let config = ServerConfig::from_env();
    info!("Memory Match Server v{}", VERSION);
    info!(
        "Rooms: {}-{} players, {} cards, {}ms reveal delay, {:?} below minimum",
        config.session.match_config.min_players,
        config.session.match_config.max_players,
        config.session.match_config.card_count,
        config.session.reveal_delay.as_millis(),
        config.session.match_config.below_minimum,
    );

    let server = Arc::new(GameServer::new(config));
    let running = server.clone();
    let mut server_handle = tokio::spawn(async move { running.run().await });

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Server task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            server.shutdown();
            let _ = server_handle.await;
        }
    }

    Ok(())
}
