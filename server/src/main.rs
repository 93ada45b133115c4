use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::lobby::Lobby;
use server::network::Server;
use server::store::{JsonFileStore, MemoryStore, SharedStore};
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, opens the match store and runs the WebSocket server.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let store: SharedStore = match &config.store {
        Some(path) => {
            info!("Persisting match records to {}", path.display());
            Arc::new(JsonFileStore::open(path)?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    info!(
        "Starting match server on {} ({} Hz, snapshot every {} ticks, bot fill after {} ms)",
        config.address(),
        config.tick_rate,
        config.snapshot_interval(),
        config.bot_fill_ms
    );

    let address = config.address();
    let lobby = Lobby::new(config, store);
    let server = Server::bind(&address, lobby).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
