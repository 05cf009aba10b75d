// SPDX-License-Identifier: MIT

//! SQLite store with typed operations.
//!
//! Provides high-level operations for:
//! - Connections (per-user provider credentials and sync watermark)
//! - Readings (idempotent batched inserts)
//! - OAuth states (single-use connect tokens)

use crate::db::schema::SQLITE_INIT;
use crate::error::AppError;
use crate::models::{CgmConnection, GlucoseReading, Provider};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// OAuth state tokens older than this are rejected as expired.
const STATE_TTL_MINUTES: i64 = 10;

/// Result of consuming an OAuth state token.
///
/// Explicit variants so callers can distinguish "expected absence"
/// (replayed/unknown state) from expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLookup {
    Found { user_id: String, provider: Provider },
    NotFound,
    Expired,
}

/// SQLite database store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and apply
    /// the schema.
    pub async fn new(database_url: &str) -> Result<Self, AppError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Database(format!("invalid database url: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| AppError::Database(format!("db connect failed: {}", e)))?;

        let store = Self { pool };
        store.apply_schema().await?;

        tracing::info!("Connected to SQLite");
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive for the life of the pool.
    pub async fn new_in_memory() -> Result<Self, AppError> {
        let connect_opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::Database(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await
            .map_err(|e| AppError::Database(format!("db connect failed: {}", e)))?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<(), AppError> {
        sqlx::raw_sql(SQLITE_INIT)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("schema init failed: {}", e)))?;
        Ok(())
    }

    // ─── Connection Operations ───────────────────────────────────

    /// Create or replace a connection for (user, provider).
    ///
    /// A reconnect replaces all credentials and clears `needs_reauth`, but
    /// keeps the existing watermark so history is not re-fetched.
    pub async fn upsert_connection(&self, conn: &CgmConnection) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO cgm_connections (
                user_id, provider, access_token, refresh_token, expires_at,
                provider_url, auth_scheme, last_sync_at, sync_enabled,
                needs_reauth, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                provider_url = excluded.provider_url,
                auth_scheme = excluded.auth_scheme,
                sync_enabled = excluded.sync_enabled,
                needs_reauth = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conn.user_id)
        .bind(conn.provider.as_str())
        .bind(&conn.access_token)
        .bind(&conn.refresh_token)
        .bind(conn.expires_at.map(format_utc_rfc3339))
        .bind(&conn.provider_url)
        .bind(conn.auth_scheme.map(|s| s.as_str()))
        .bind(conn.last_sync_at.map(format_utc_rfc3339))
        .bind(conn.sync_enabled)
        .bind(conn.needs_reauth)
        .bind(format_utc_rfc3339(conn.created_at))
        .bind(format_utc_rfc3339(conn.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get one connection.
    pub async fn get_connection(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<CgmConnection>, AppError> {
        let row = sqlx::query(
            "SELECT * FROM cgm_connections WHERE user_id = ? AND provider = ?",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_connection).transpose()
    }

    /// All connections for a user.
    pub async fn list_connections(&self, user_id: &str) -> Result<Vec<CgmConnection>, AppError> {
        let rows = sqlx::query("SELECT * FROM cgm_connections WHERE user_id = ? ORDER BY provider")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_connection).collect()
    }

    /// Rotate stored tokens in a single atomic UPDATE.
    ///
    /// The new refresh token replaces the old one; the very next reader
    /// observes the rotation.
    pub async fn update_connection_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE cgm_connections
            SET access_token = ?, refresh_token = ?, expires_at = ?,
                needs_reauth = 0, updated_at = ?
            WHERE user_id = ? AND provider = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(format_utc_rfc3339(expires_at))
        .bind(format_utc_rfc3339(Utc::now()))
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flag a connection as needing the user to reconnect.
    pub async fn set_needs_reauth(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE cgm_connections SET needs_reauth = 1, updated_at = ? \
             WHERE user_id = ? AND provider = ?",
        )
        .bind(format_utc_rfc3339(Utc::now()))
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Advance the sync watermark.
    ///
    /// Returns `false` when no row was touched, i.e. the connection was
    /// deleted while the sync was in flight; the caller discards the
    /// watermark update (merged readings stay).
    pub async fn advance_watermark(
        &self,
        user_id: &str,
        provider: Provider,
        watermark: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE cgm_connections SET last_sync_at = ?, updated_at = ? \
             WHERE user_id = ? AND provider = ?",
        )
        .bind(format_utc_rfc3339(watermark))
        .bind(format_utc_rfc3339(Utc::now()))
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a connection. Historical readings are retained.
    pub async fn delete_connection(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM cgm_connections WHERE user_id = ? AND provider = ?")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ─── Reading Operations ──────────────────────────────────────

    /// Insert one bounded batch of readings in a single transaction with
    /// conflict-ignore semantics.
    ///
    /// Returns `(inserted, duplicates)`. An error rolls back only this
    /// batch; previously committed batches are unaffected.
    pub async fn insert_readings(
        &self,
        readings: &[GlucoseReading],
    ) -> Result<(usize, usize), AppError> {
        // OR IGNORE would silently skip rows violating the value CHECK, so
        // the invariant is enforced here: an invalid row fails the whole
        // batch instead of vanishing.
        if let Some(bad) = readings
            .iter()
            .find(|r| !r.value_mgdl.is_finite() || r.value_mgdl <= 0.0)
        {
            return Err(AppError::Database(format!(
                "reading at {} violates value constraint",
                bad.device_time
            )));
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for reading in readings {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO glucose_readings (
                    user_id, device_time, value_mgdl, trend, source,
                    external_id, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&reading.user_id)
            .bind(format_utc_rfc3339(reading.device_time))
            .bind(reading.value_mgdl)
            .bind(&reading.trend)
            .bind(reading.source.as_str())
            .bind(&reading.external_id)
            .bind(format_utc_rfc3339(reading.created_at))
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok((inserted, readings.len() - inserted))
    }

    /// Readings for a user, oldest first, optionally bounded below.
    pub async fn get_readings(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<GlucoseReading>, AppError> {
        let rows = match since {
            Some(since) => {
                sqlx::query(
                    "SELECT * FROM glucose_readings \
                     WHERE user_id = ? AND device_time >= ? \
                     ORDER BY device_time ASC LIMIT ?",
                )
                .bind(user_id)
                .bind(format_utc_rfc3339(since))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM glucose_readings WHERE user_id = ? \
                     ORDER BY device_time ASC LIMIT ?",
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_reading).collect()
    }

    /// Total stored readings for a user.
    pub async fn count_readings(&self, user_id: &str) -> Result<u64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM glucose_readings WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    // ─── OAuth State Operations ──────────────────────────────────

    /// Store a freshly generated single-use state token.
    pub async fn create_oauth_state(
        &self,
        state: &str,
        user_id: &str,
        provider: Provider,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO oauth_states (state, user_id, provider, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(state)
        .bind(user_id)
        .bind(provider.as_str())
        .bind(format_utc_rfc3339(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Consume a state token: look it up and delete it in one statement,
    /// so a replayed callback finds nothing.
    pub async fn consume_oauth_state(&self, state: &str) -> Result<StateLookup, AppError> {
        let row = sqlx::query(
            "DELETE FROM oauth_states WHERE state = ? RETURNING user_id, provider, created_at",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(StateLookup::NotFound);
        };

        let created_at: String = row.try_get("created_at")?;
        let created_at = parse_utc_rfc3339(&created_at)
            .ok_or_else(|| AppError::Database("malformed oauth state timestamp".to_string()))?;

        if Utc::now() - created_at > Duration::minutes(STATE_TTL_MINUTES) {
            return Ok(StateLookup::Expired);
        }

        let user_id: String = row.try_get("user_id")?;
        let provider: String = row.try_get("provider")?;
        let provider = provider
            .parse::<Provider>()
            .map_err(AppError::Database)?;

        Ok(StateLookup::Found { user_id, provider })
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Insert a state token with an explicit creation time, for aging
    /// states past their TTL in tests.
    pub(crate) async fn insert_oauth_state_at(
        &self,
        state: &str,
        user_id: &str,
        provider: Provider,
        created_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO oauth_states (state, user_id, provider, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(state)
        .bind(user_id)
        .bind(provider.as_str())
        .bind(format_utc_rfc3339(created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ─── Row Mapping ─────────────────────────────────────────────────

fn row_to_connection(row: sqlx::sqlite::SqliteRow) -> Result<CgmConnection, AppError> {
    let provider: String = row.try_get("provider")?;
    let provider = provider.parse::<Provider>().map_err(AppError::Database)?;

    let auth_scheme: Option<String> = row.try_get("auth_scheme")?;
    let auth_scheme = auth_scheme
        .map(|s| s.parse().map_err(AppError::Database))
        .transpose()?;

    Ok(CgmConnection {
        user_id: row.try_get("user_id")?,
        provider,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        expires_at: parse_optional_ts(&row, "expires_at")?,
        provider_url: row.try_get("provider_url")?,
        auth_scheme,
        last_sync_at: parse_optional_ts(&row, "last_sync_at")?,
        sync_enabled: row.try_get("sync_enabled")?,
        needs_reauth: row.try_get("needs_reauth")?,
        created_at: parse_required_ts(&row, "created_at")?,
        updated_at: parse_required_ts(&row, "updated_at")?,
    })
}

fn row_to_reading(row: sqlx::sqlite::SqliteRow) -> Result<GlucoseReading, AppError> {
    let source: String = row.try_get("source")?;
    let source = source.parse::<Provider>().map_err(AppError::Database)?;

    Ok(GlucoseReading {
        user_id: row.try_get("user_id")?,
        device_time: parse_required_ts(&row, "device_time")?,
        value_mgdl: row.try_get("value_mgdl")?,
        trend: row.try_get("trend")?,
        source,
        external_id: row.try_get("external_id")?,
        created_at: parse_required_ts(&row, "created_at")?,
    })
}

fn parse_optional_ts(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, AppError> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|s| {
            parse_utc_rfc3339(&s)
                .ok_or_else(|| AppError::Database(format!("malformed timestamp in {}", column)))
        })
        .transpose()
}

fn parse_required_ts(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<DateTime<Utc>, AppError> {
    let value: String = row.try_get(column)?;
    parse_utc_rfc3339(&value)
        .ok_or_else(|| AppError::Database(format!("malformed timestamp in {}", column)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aged_oauth_state_is_expired_and_still_deleted() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store
            .insert_oauth_state_at(
                "aged",
                "u1",
                Provider::Dexcom,
                Utc::now() - Duration::minutes(STATE_TTL_MINUTES + 1),
            )
            .await
            .unwrap();

        assert_eq!(
            store.consume_oauth_state("aged").await.unwrap(),
            StateLookup::Expired
        );

        // Consumption deletes the row even when it turns out expired, so
        // the token cannot be probed again.
        assert_eq!(
            store.consume_oauth_state("aged").await.unwrap(),
            StateLookup::NotFound
        );
    }

    #[tokio::test]
    async fn state_just_inside_ttl_is_found() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store
            .insert_oauth_state_at(
                "fresh",
                "u1",
                Provider::Dexcom,
                Utc::now() - Duration::minutes(STATE_TTL_MINUTES - 1),
            )
            .await
            .unwrap();

        assert_eq!(
            store.consume_oauth_state("fresh").await.unwrap(),
            StateLookup::Found {
                user_id: "u1".to_string(),
                provider: Provider::Dexcom,
            }
        );
    }
}
