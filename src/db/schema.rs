// SPDX-License-Identifier: MIT

//! SQL DDL for initializing the database schema.

/// SQLite schema:
/// - `cgm_connections`: one row per (user_id, provider)
/// - `glucose_readings`: canonical readings, duplicate-proof via unique keys
/// - `oauth_states`: single-use OAuth state tokens
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS cgm_connections (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    expires_at TEXT NULL, -- RFC3339
    provider_url TEXT NULL,
    auth_scheme TEXT NULL,
    last_sync_at TEXT NULL, -- RFC3339 watermark
    sync_enabled INTEGER NOT NULL DEFAULT 1,
    needs_reauth INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL, -- RFC3339
    UNIQUE(user_id, provider)
);

CREATE TABLE IF NOT EXISTS glucose_readings (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    device_time TEXT NOT NULL, -- RFC3339 UTC
    value_mgdl REAL NOT NULL CHECK (value_mgdl > 0),
    trend TEXT NULL,
    source TEXT NOT NULL,
    external_id TEXT NULL,
    created_at TEXT NOT NULL, -- RFC3339
    UNIQUE(user_id, device_time, source)
);

-- external_id uniqueness only where the provider supplied one
CREATE UNIQUE INDEX IF NOT EXISTS idx_readings_external_id
    ON glucose_readings(user_id, source, external_id)
    WHERE external_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_readings_user_time
    ON glucose_readings(user_id, device_time);

CREATE TABLE IF NOT EXISTS oauth_states (
    state TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    created_at TEXT NOT NULL -- RFC3339
);
"#;
