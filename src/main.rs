use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

mod api;
mod config;
mod db;
mod players;
mod props;

use api::{AppState, EstimatorSettings};
use config::Config;
use db::Database;
use players::PlayerCache;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Open database
    let db = Database::open(&config.database_path)?;
    let stats = db.get_stats()?;
    info!(
        "Database opened: {} ({} players, {} games, {} box scores)",
        config.database_path, stats.players, stats.games, stats.player_games
    );

    // Warm the player directory so the first search doesn't pay for it
    let players = PlayerCache::new();
    let loaded = players.reload(&db).await?;
    info!("Player directory loaded: {} players", loaded);

    let smoothing = config.smoothing();
    info!(
        "Estimator: {:?}, {} default / {} max Monte Carlo draws",
        smoothing, config.default_samples, config.max_samples
    );

    let state = AppState {
        db,
        players,
        settings: EstimatorSettings {
            smoothing,
            default_samples: config.default_samples,
            max_samples: config.max_samples,
        },
    };
    let origins = config.allowed_origins();
    let app = api::router(state, api::cors_layer(&origins)?);

    let addr: SocketAddr = config.api_addr.parse()?;
    info!("API listening on http://{} (CORS origins: {:?})", addr, origins);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
