// SPDX-License-Identifier: MIT

//! Refresh-token rotation tests against a mock token endpoint that
//! invalidates each refresh token when it is used.

mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Form, Json, Router};
use cgm_sync::error::AppError;
use cgm_sync::models::{CgmConnection, Provider};
use cgm_sync::providers::DexcomClient;
use cgm_sync::services::TokenRefresher;
use chrono::{Duration, Utc};
use common::{spawn_server, test_store};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Deserialize)]
struct GrantForm {
    grant_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Clone)]
struct MockGrants {
    /// The single refresh token the provider currently honors.
    valid_refresh: Arc<Mutex<String>>,
    calls: Arc<AtomicUsize>,
}

async fn token_endpoint(
    State(grants): State<MockGrants>,
    Form(form): Form<GrantForm>,
) -> axum::response::Response {
    let n = grants.calls.fetch_add(1, Ordering::SeqCst) + 1;

    if form.grant_type != "refresh_token" {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let mut valid = grants.valid_refresh.lock().unwrap();
    if form.refresh_token.as_deref() != Some(valid.as_str()) {
        // Reused or revoked grant
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        )
            .into_response();
    }

    *valid = format!("rt-{}", n);
    Json(json!({
        "access_token": format!("at-{}", n),
        "refresh_token": valid.clone(),
        "expires_in": 7200,
    }))
    .into_response()
}

async fn setup(
    initial_refresh: &str,
) -> (cgm_sync::db::SqliteStore, TokenRefresher, MockGrants) {
    let grants = MockGrants {
        valid_refresh: Arc::new(Mutex::new(initial_refresh.to_string())),
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let router = Router::new()
        .route("/v2/oauth2/token", post(token_endpoint))
        .with_state(grants.clone());
    let base_url = spawn_server(router).await;

    let store = test_store().await;
    let dexcom = DexcomClient::new(base_url, "cid".to_string(), "secret".to_string());
    let refresher = TokenRefresher::new(
        store.clone(),
        dexcom,
        Arc::new(dashmap::DashMap::new()),
    );
    (store, refresher, grants)
}

fn expiring_connection(refresh_token: &str) -> CgmConnection {
    // Expiring in 10 minutes, inside the refresh buffer.
    CgmConnection::new_dexcom(
        "u1",
        "stale-access".to_string(),
        refresh_token.to_string(),
        Utc::now() + Duration::minutes(10),
    )
}

#[tokio::test]
async fn refresh_rotates_and_persists_before_returning() {
    let (store, refresher, grants) = setup("rt-0").await;
    let connection = expiring_connection("rt-0");
    store.upsert_connection(&connection).await.unwrap();

    let token = refresher.ensure_valid(&connection).await.unwrap();
    assert_eq!(token, "at-1");
    assert_eq!(grants.calls.load(Ordering::SeqCst), 1);

    // The rotated pair is what the store now holds.
    let stored = store
        .get_connection("u1", Provider::Dexcom)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("at-1"));
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-1"));
    assert!(stored.expires_at.unwrap() > Utc::now() + Duration::minutes(110));
}

#[tokio::test]
async fn stale_snapshot_reuses_rotated_token_instead_of_replaying_grant() {
    let (store, refresher, grants) = setup("rt-0").await;
    let connection = expiring_connection("rt-0");
    store.upsert_connection(&connection).await.unwrap();

    let first = refresher.ensure_valid(&connection).await.unwrap();
    assert_eq!(first, "at-1");

    // A second caller still holding the pre-rotation snapshot: after the
    // lock it re-reads the store, finds the fresh token, and never sends
    // the dead refresh token to the provider.
    let second = refresher.ensure_valid(&connection).await.unwrap();
    assert_eq!(second, "at-1");
    assert_eq!(grants.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_grant_marks_connection_for_reauth() {
    let (store, refresher, _grants) = setup("rt-valid").await;
    // The stored refresh token is not the one the provider honors.
    let connection = expiring_connection("rt-revoked");
    store.upsert_connection(&connection).await.unwrap();

    let result = refresher.ensure_valid(&connection).await;
    assert!(matches!(result, Err(AppError::ReauthRequired)));

    let stored = store
        .get_connection("u1", Provider::Dexcom)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.needs_reauth);
}

#[tokio::test]
async fn valid_token_skips_the_provider_entirely() {
    let (store, refresher, grants) = setup("rt-0").await;
    let connection = CgmConnection::new_dexcom(
        "u1",
        "fresh-access".to_string(),
        "rt-0".to_string(),
        Utc::now() + Duration::hours(4),
    );
    store.upsert_connection(&connection).await.unwrap();

    let token = refresher.ensure_valid(&connection).await.unwrap();
    assert_eq!(token, "fresh-access");
    assert_eq!(grants.calls.load(Ordering::SeqCst), 0);
}
