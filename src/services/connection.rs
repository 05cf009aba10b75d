// SPDX-License-Identifier: MIT

//! Connection lifecycle: OAuth connect flow, Nightscout setup, disconnect.
//!
//! Sits above the sync orchestrator, not in its hot path.

use crate::db::{SqliteStore, StateLookup};
use crate::error::AppError;
use crate::models::{CgmConnection, NightscoutAuthScheme, Provider};
use crate::providers::{DexcomClient, NightscoutClient};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;

/// Length of the opaque OAuth state token.
const STATE_TOKEN_LEN: usize = 32;

/// Per-provider connection status for the app.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub provider: Provider,
    pub connected: bool,
    pub needs_reauth: bool,
    pub sync_enabled: bool,
    pub last_sync_at: Option<chrono::DateTime<Utc>>,
}

/// Manages connect and disconnect for all providers.
#[derive(Clone)]
pub struct ConnectionService {
    store: SqliteStore,
    dexcom: DexcomClient,
    /// Public base URL of this service, for the OAuth redirect URI
    api_url: String,
}

impl ConnectionService {
    pub fn new(store: SqliteStore, dexcom: DexcomClient, api_url: String) -> Self {
        Self {
            store,
            dexcom,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn dexcom_redirect_uri(&self) -> String {
        format!("{}/auth/dexcom/callback", self.api_url)
    }

    // ─── Dexcom OAuth ────────────────────────────────────────────

    /// Start the Dexcom connect flow for a user.
    ///
    /// Generates an opaque, single-use state token mapped server-side to
    /// the initiating user, and returns the provider authorize URL.
    pub async fn begin_dexcom_connect(&self, user_id: &str) -> Result<String, AppError> {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_TOKEN_LEN)
            .map(char::from)
            .collect();

        self.store
            .create_oauth_state(&state, user_id, Provider::Dexcom)
            .await?;

        tracing::info!(user_id, "Dexcom connect started");
        Ok(self.dexcom.authorize_url(&self.dexcom_redirect_uri(), &state))
    }

    /// Handle the OAuth callback: consume the state, then exchange the code.
    ///
    /// The state is invalidated BEFORE the code exchange, so a replayed
    /// callback deterministically fails and the exchanged tokens are never
    /// attributed to any user. There is no raw-state fallback path.
    pub async fn complete_dexcom_callback(
        &self,
        state: &str,
        code: &str,
    ) -> Result<String, AppError> {
        let user_id = match self.store.consume_oauth_state(state).await? {
            StateLookup::Found { user_id, provider } if provider == Provider::Dexcom => user_id,
            StateLookup::Found { .. } => {
                return Err(AppError::BadRequest(
                    "state was issued for a different provider".to_string(),
                ))
            }
            StateLookup::NotFound => {
                tracing::warn!("OAuth callback with unknown or already-used state");
                return Err(AppError::BadRequest(
                    "invalid or already-used state".to_string(),
                ));
            }
            StateLookup::Expired => {
                return Err(AppError::BadRequest("state has expired".to_string()))
            }
        };

        let tokens = self
            .dexcom
            .exchange_code(code, &self.dexcom_redirect_uri())
            .await?;

        let connection = CgmConnection::new_dexcom(
            &user_id,
            tokens.access_token.clone(),
            tokens.refresh_token.clone(),
            tokens.expires_at(),
        );
        self.store.upsert_connection(&connection).await?;

        tracing::info!(user_id = %user_id, "Dexcom connection stored");
        Ok(user_id)
    }

    // ─── Nightscout ──────────────────────────────────────────────

    /// Save a Nightscout connection after verifying the credentials work.
    pub async fn save_nightscout(
        &self,
        user_id: &str,
        url: &str,
        secret: &str,
        scheme: NightscoutAuthScheme,
    ) -> Result<(), AppError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AppError::BadRequest(
                "nightscout url must be absolute".to_string(),
            ));
        }
        if secret.is_empty() {
            return Err(AppError::BadRequest(
                "nightscout token or api_secret is required".to_string(),
            ));
        }

        NightscoutClient::new(url, scheme).verify(secret).await?;

        let connection =
            CgmConnection::new_nightscout(user_id, url.to_string(), secret.to_string(), scheme);
        self.store.upsert_connection(&connection).await?;

        tracing::info!(user_id, "Nightscout connection stored");
        Ok(())
    }

    // ─── Status & Disconnect ─────────────────────────────────────

    /// Connection status for every provider, connected or not.
    pub async fn status(&self, user_id: &str) -> Result<Vec<ConnectionStatus>, AppError> {
        let connections = self.store.list_connections(user_id).await?;

        let status = [Provider::Dexcom, Provider::Nightscout]
            .into_iter()
            .map(|provider| {
                match connections.iter().find(|c| c.provider == provider) {
                    Some(c) => ConnectionStatus {
                        provider,
                        connected: true,
                        needs_reauth: c.needs_reauth,
                        sync_enabled: c.sync_enabled,
                        last_sync_at: c.last_sync_at,
                    },
                    None => ConnectionStatus {
                        provider,
                        connected: false,
                        needs_reauth: false,
                        sync_enabled: false,
                        last_sync_at: None,
                    },
                }
            })
            .collect();

        Ok(status)
    }

    /// Delete a connection. Historical readings are never deleted by
    /// disconnect.
    pub async fn disconnect(&self, user_id: &str, provider: Provider) -> Result<(), AppError> {
        let deleted = self.store.delete_connection(user_id, provider).await?;
        if !deleted {
            return Err(AppError::NotConnected(provider.to_string()));
        }

        tracing::info!(user_id, provider = %provider, "Connection deleted, readings retained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn expired_state_fails_callback_before_any_code_exchange() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store
            .insert_oauth_state_at(
                "aged",
                "u1",
                Provider::Dexcom,
                Utc::now() - Duration::minutes(15),
            )
            .await
            .unwrap();

        // Unroutable token endpoint: an attempted exchange would surface
        // as a transport error, not a BadRequest.
        let dexcom = DexcomClient::new(
            "http://127.0.0.1:9".to_string(),
            "cid".to_string(),
            "secret".to_string(),
        );
        let service =
            ConnectionService::new(store.clone(), dexcom, "https://api.example.com".to_string());

        let result = service.complete_dexcom_callback("aged", "code").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        // No tokens were attributed to the user.
        assert!(store
            .get_connection("u1", Provider::Dexcom)
            .await
            .unwrap()
            .is_none());
    }
}
