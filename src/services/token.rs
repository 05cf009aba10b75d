// SPDX-License-Identifier: MIT

//! OAuth credential lifecycle: validity checks and refresh-token grants.

use crate::db::SqliteStore;
use crate::error::AppError;
use crate::models::{CgmConnection, Provider};
use crate::providers::DexcomClient;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Refresh when less than this much lifetime remains, so a token cannot
/// expire mid-fetch.
pub const REFRESH_BUFFER_SECS: i64 = 60 * 60;

type LockKey = (String, Provider);

/// Shared per-connection refresh locks.
pub type RefreshLocks = Arc<DashMap<LockKey, Arc<Mutex<()>>>>;

/// Validates and refreshes stored provider credentials.
///
/// Refresh-token rotation is persisted in a single atomic UPDATE before the
/// new access token is handed back, so the very next caller observes the
/// rotated pair. Per-connection locks serialize refreshes; waiters re-read
/// the connection after the winner finishes.
#[derive(Clone)]
pub struct TokenRefresher {
    store: SqliteStore,
    dexcom: DexcomClient,
    refresh_locks: RefreshLocks,
}

impl TokenRefresher {
    pub fn new(store: SqliteStore, dexcom: DexcomClient, refresh_locks: RefreshLocks) -> Self {
        Self {
            store,
            dexcom,
            refresh_locks,
        }
    }

    /// Return a credential valid for at least the refresh buffer.
    ///
    /// - Nightscout secrets do not expire; the stored secret is returned.
    /// - Dexcom tokens are refreshed when inside the buffer; a provider 4xx
    ///   marks the connection `needs_reauth` and is NOT retried (retrying a
    ///   revoked refresh token can kill the whole grant chain).
    /// - Network/5xx failures leave stored tokens untouched.
    pub async fn ensure_valid(&self, connection: &CgmConnection) -> Result<String, AppError> {
        match connection.provider {
            Provider::Nightscout => connection
                .access_token
                .clone()
                .ok_or(AppError::ReauthRequired),
            Provider::Dexcom => self.ensure_valid_dexcom(connection).await,
        }
    }

    async fn ensure_valid_dexcom(&self, connection: &CgmConnection) -> Result<String, AppError> {
        if let Some(token) = usable_access_token(connection) {
            return Ok(token);
        }

        // Serialize refreshes for this connection.
        let lock = self
            .refresh_locks
            .entry((connection.user_id.clone(), connection.provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-read after acquiring the lock: another task may have rotated
        // the tokens while we waited.
        let current = self
            .store
            .get_connection(&connection.user_id, connection.provider)
            .await?
            .ok_or_else(|| AppError::NotConnected(connection.provider.to_string()))?;

        if let Some(token) = usable_access_token(&current) {
            return Ok(token);
        }

        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(AppError::ReauthRequired)?;

        tracing::info!(
            user_id = %current.user_id,
            provider = %current.provider,
            "Access token expiring, refreshing"
        );

        let new_tokens = match self.dexcom.refresh_token(refresh_token).await {
            Ok(t) => t,
            Err(AppError::ReauthRequired) => {
                // Invalid or revoked grant: suspend syncing until the user
                // reconnects.
                self.store
                    .set_needs_reauth(&current.user_id, current.provider)
                    .await?;
                tracing::warn!(
                    user_id = %current.user_id,
                    "Refresh grant rejected, connection marked for reauthorization"
                );
                return Err(AppError::ReauthRequired);
            }
            Err(e) => return Err(e),
        };

        let expires_at = new_tokens.expires_at();
        self.store
            .update_connection_tokens(
                &current.user_id,
                current.provider,
                &new_tokens.access_token,
                &new_tokens.refresh_token,
                expires_at,
            )
            .await?;

        tracing::info!(user_id = %current.user_id, "Token refreshed and stored");
        Ok(new_tokens.access_token)
    }
}

/// The stored access token, if it is still comfortably valid.
fn usable_access_token(connection: &CgmConnection) -> Option<String> {
    let token = connection.access_token.as_ref()?;
    let expires_at = connection.expires_at?;
    if Utc::now() + Duration::seconds(REFRESH_BUFFER_SECS) < expires_at {
        Some(token.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CgmConnection;

    fn dexcom_connection(expires_in_secs: i64) -> CgmConnection {
        CgmConnection::new_dexcom(
            "u1",
            "access".to_string(),
            "refresh".to_string(),
            Utc::now() + Duration::seconds(expires_in_secs),
        )
    }

    #[test]
    fn token_well_inside_lifetime_is_usable() {
        let conn = dexcom_connection(4 * 60 * 60);
        assert_eq!(usable_access_token(&conn).as_deref(), Some("access"));
    }

    #[test]
    fn token_inside_refresh_buffer_is_not_usable() {
        // Expiring in 30 minutes: not expired yet, but within the 1h buffer.
        let conn = dexcom_connection(30 * 60);
        assert_eq!(usable_access_token(&conn), None);

        let expired = dexcom_connection(-60);
        assert_eq!(usable_access_token(&expired), None);
    }

    #[test]
    fn missing_expiry_forces_refresh() {
        let mut conn = dexcom_connection(4 * 60 * 60);
        conn.expires_at = None;
        assert_eq!(usable_access_token(&conn), None);
    }
}
