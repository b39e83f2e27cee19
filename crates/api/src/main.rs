// API server clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! FileForge API Server
//!
//! HTTP surface for the billing engine: webhook ingress from the payment
//! processor, internal entitlement queries for the file tools, and admin
//! operations.

mod config;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fileforge_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FileForge API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = fileforge_shared::create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    fileforge_shared::run_migrations(&pool).await?;

    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let state = AppState::new(config, pool)?;

    let app = create_router(state).layer(TraceLayer::new_for_http());

    tracing::info!(addr = %bind_addr, "Listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
