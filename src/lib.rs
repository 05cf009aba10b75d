// SPDX-License-Identifier: MIT

//! CGM synchronization core for a health-tracking app.
//!
//! Pulls glucose telemetry from linked providers (Dexcom OAuth API,
//! self-hosted Nightscout instances), normalizes it into one canonical
//! reading schema, and persists it idempotently under repeated,
//! overlapping and concurrent sync attempts.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::SqliteStore;
use services::{ConnectionService, SyncService};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: SqliteStore,
    pub sync_service: SyncService,
    pub connection_service: ConnectionService,
}
