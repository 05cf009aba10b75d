// SPDX-License-Identifier: MIT

//! CGM-Sync API Server
//!
//! Links CGM accounts (Dexcom, Nightscout) to the health tracker and keeps
//! glucose readings synchronized.

use cgm_sync::{
    config::Config,
    db::SqliteStore,
    providers::DexcomClient,
    services::{ConnectionService, SyncLeases, SyncService, TokenRefresher},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting CGM-Sync API");

    // Initialize SQLite store
    let store = SqliteStore::new(&config.database_url)
        .await
        .expect("Failed to open database");

    // Initialize Dexcom client
    let dexcom = DexcomClient::new(
        config.dexcom_base_url.clone(),
        config.dexcom_client_id.clone(),
        config.dexcom_client_secret.clone(),
    );

    // Shared refresh locks and sync leases (one set per process)
    let refresh_locks = Arc::new(dashmap::DashMap::new());
    let leases = SyncLeases::new();

    let refresher = TokenRefresher::new(store.clone(), dexcom.clone(), refresh_locks);
    let sync_service = SyncService::new(store.clone(), dexcom.clone(), refresher, leases);
    let connection_service =
        ConnectionService::new(store.clone(), dexcom, config.api_url.clone());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        sync_service,
        connection_service,
    });

    // Build router
    let app = cgm_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cgm_sync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
