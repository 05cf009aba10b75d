// SPDX-License-Identifier: MIT

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{GlucoseReading, NightscoutAuthScheme, Provider, SyncStatus};
use crate::services::{ConnectionStatus, SyncRequest};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_READINGS_PAGE: u32 = 1000;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sync", post(trigger_sync))
        .route("/api/connections", get(get_connections))
        .route(
            "/api/connections/dexcom/authorize",
            post(dexcom_authorize),
        )
        .route("/api/connections/nightscout", put(save_nightscout))
        .route("/api/connections/{provider}", delete(disconnect))
        .route("/api/readings", get(get_readings))
}

// ─── Sync ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SyncBody {
    provider: Provider,
    #[serde(default)]
    days: Option<i64>,
    #[serde(default)]
    start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SyncResponse {
    synced: bool,
    total_readings: usize,
    inserted: usize,
    duplicates: usize,
    skipped: usize,
    failed: usize,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

/// Trigger one sync for the caller's connection.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SyncBody>,
) -> Result<Json<SyncResponse>> {
    let request = SyncRequest {
        days: body.days,
        start_date: body.start_date,
        end_date: body.end_date,
    };

    let report = state
        .sync_service
        .run(&user.user_id, body.provider, request)
        .await?;

    Ok(Json(SyncResponse {
        synced: report.status == SyncStatus::Completed,
        total_readings: report.fetched,
        inserted: report.inserted,
        duplicates: report.duplicates,
        skipped: report.skipped,
        failed: report.failed,
        start_date: report.start_date,
        end_date: report.end_date,
    }))
}

// ─── Connections ─────────────────────────────────────────────

/// Connection status per provider.
async fn get_connections(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ConnectionStatus>>> {
    let status = state.connection_service.status(&user.user_id).await?;
    Ok(Json(status))
}

#[derive(Serialize)]
struct AuthorizeResponse {
    authorize_url: String,
}

/// Start the Dexcom OAuth connect flow.
async fn dexcom_authorize(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<AuthorizeResponse>> {
    let authorize_url = state
        .connection_service
        .begin_dexcom_connect(&user.user_id)
        .await?;

    Ok(Json(AuthorizeResponse { authorize_url }))
}

#[derive(Deserialize)]
struct NightscoutBody {
    url: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    api_secret: Option<String>,
}

#[derive(Serialize)]
struct SavedResponse {
    saved: bool,
}

/// Save (or replace) a Nightscout connection.
async fn save_nightscout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NightscoutBody>,
) -> Result<Json<SavedResponse>> {
    let (secret, scheme) = match (body.token, body.api_secret) {
        (Some(token), _) if !token.is_empty() => (token, NightscoutAuthScheme::Token),
        (_, Some(secret)) if !secret.is_empty() => (secret, NightscoutAuthScheme::ApiSecret),
        _ => {
            return Err(AppError::BadRequest(
                "either token or api_secret is required".to_string(),
            ))
        }
    };

    state
        .connection_service
        .save_nightscout(&user.user_id, &body.url, &secret, scheme)
        .await?;

    Ok(Json(SavedResponse { saved: true }))
}

#[derive(Serialize)]
struct DisconnectResponse {
    disconnected: bool,
}

/// Disconnect a provider. Synced readings are retained.
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> Result<Json<DisconnectResponse>> {
    let provider: Provider = provider
        .parse()
        .map_err(AppError::BadRequest)?;

    state
        .connection_service
        .disconnect(&user.user_id, provider)
        .await?;

    Ok(Json(DisconnectResponse { disconnected: true }))
}

// ─── Readings ────────────────────────────────────────────────

#[derive(Deserialize)]
struct ReadingsQuery {
    /// Lower bound on device_time (RFC 3339)
    #[serde(default)]
    since: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    288 // one day of 5-minute readings
}

/// Synced readings for the caller, oldest first.
async fn get_readings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ReadingsQuery>,
) -> Result<Json<Vec<GlucoseReading>>> {
    let limit = query.limit.min(MAX_READINGS_PAGE);
    let readings = state
        .store
        .get_readings(&user.user_id, query.since, limit)
        .await?;

    Ok(Json(readings))
}
