//! Idle combat game server
//!
//! Characters pick fights in their current zone; the server resolves every
//! attack on timers and hands out loot and experience.

mod combat;
mod config;
mod entities;
mod error;
mod loot;
mod network;
mod persistence;
mod stats;
mod world;

use std::sync::Arc;

use log::{error, info};

use crate::combat::{ChannelSink, EncounterEngine};
use crate::config::ServerConfig;
use crate::network::Server;
use crate::persistence::{CharacterRepository, MemoryRepository};
use crate::world::WorldContent;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    info!("Starting idle server...");
    info!("Listening on port {}", config.port);

    // Reference data must be consistent before anything can fight
    let content = match WorldContent::load_or_default(&config.content_path) {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to load content from {}: {}", config.content_path, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = content.validate() {
        error!("Content validation failed: {}", e);
        std::process::exit(1);
    }

    // Initialize persistence (database + cache)
    let persistence = match persistence::init(&config.database_url, &config.redis_url).await {
        Ok(handle) => {
            info!("Persistence layer initialized");
            Some(handle)
        }
        Err(e) => {
            error!("Failed to initialize persistence: {}", e);
            error!("Server will run with in-memory characters only (nothing is saved)");
            None
        }
    };
    let repository: Arc<dyn CharacterRepository> = match &persistence {
        Some(handle) => Arc::new(handle.clone()),
        None => Arc::new(MemoryRepository::new()),
    };

    let (sink, events) = ChannelSink::channel();
    let engine = EncounterEngine::new(Arc::new(content), repository.clone(), Arc::new(sink), config.engine);

    let mut server = match Server::new(config.port, engine, repository, events).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return;
        }
    };

    info!("Server started successfully!");
    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    if let Some(persistence) = persistence {
        persistence.shutdown().await;
    }
}
