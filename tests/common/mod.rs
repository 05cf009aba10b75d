// SPDX-License-Identifier: MIT

use cgm_sync::config::Config;
use cgm_sync::db::SqliteStore;
use cgm_sync::models::{GlucoseReading, Provider};
use cgm_sync::providers::DexcomClient;
use cgm_sync::routes::create_router;
use cgm_sync::services::{ConnectionService, SyncLeases, SyncService, TokenRefresher};
use cgm_sync::AppState;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

/// Create an in-memory test store.
#[allow(dead_code)]
pub async fn test_store() -> SqliteStore {
    SqliteStore::new_in_memory()
        .await
        .expect("in-memory store should open")
}

/// Create a test app backed by an in-memory store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub async fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let store = test_store().await;
    let state = build_state(config, store);
    (create_router(state.clone()), state)
}

fn build_state(config: Config, store: SqliteStore) -> Arc<AppState> {
    let dexcom = DexcomClient::new(
        config.dexcom_base_url.clone(),
        config.dexcom_client_id.clone(),
        config.dexcom_client_secret.clone(),
    );
    let refresh_locks = Arc::new(dashmap::DashMap::new());
    let refresher = TokenRefresher::new(store.clone(), dexcom.clone(), refresh_locks);
    let sync_service = SyncService::new(
        store.clone(),
        dexcom.clone(),
        refresher,
        SyncLeases::new(),
    );
    let connection_service =
        ConnectionService::new(store.clone(), dexcom, config.api_url.clone());

    Arc::new(AppState {
        config,
        store,
        sync_service,
        connection_service,
    })
}

/// Create a session JWT using the test signing key.
#[allow(dead_code)]
pub fn test_jwt(user_id: &str) -> String {
    cgm_sync::middleware::auth::create_jwt(user_id, &Config::test_default().jwt_signing_key)
        .expect("jwt creation")
}

/// Serve an axum router on an ephemeral port; returns its base URL.
#[allow(dead_code)]
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server");
    });

    format!("http://{}", addr)
}

/// A canonical reading `minutes` minutes after a fixed epoch.
#[allow(dead_code)]
pub fn reading(user_id: &str, minutes: i64, external_id: Option<&str>) -> GlucoseReading {
    GlucoseReading {
        user_id: user_id.to_string(),
        device_time: base_time() + Duration::minutes(minutes),
        value_mgdl: 100.0 + (minutes % 50) as f64,
        trend: Some("flat".to_string()),
        source: Provider::Dexcom,
        external_id: external_id.map(str::to_string),
        created_at: Utc::now(),
    }
}

#[allow(dead_code)]
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
}
