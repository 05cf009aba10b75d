// SPDX-License-Identifier: MIT

//! Dexcom API client: OAuth grants and EGV (estimated glucose value) fetch.
//!
//! Handles:
//! - Authorize URL construction and code exchange
//! - Refresh-token grant with rotation
//! - EGV retrieval with `startDate`/`endDate` windows
//! - Envelope variance between API versions (`egvs` vs `records`)

use crate::error::AppError;
use crate::models::SyncWindow;
use crate::providers::{reject_non_success, GlucoseProvider, RawReading, PROVIDER_HTTP_TIMEOUT_SECS};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Dexcom caps EGV queries at 30 days per request; wider windows are
/// fetched in slices.
const MAX_WINDOW_DAYS: i64 = 30;

/// Dexcom API client.
#[derive(Clone)]
pub struct DexcomClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl DexcomClient {
    /// Create a new Dexcom client with OAuth credentials.
    pub fn new(base_url: String, client_id: String, client_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        }
    }

    /// Browser-redirect authorize URL for the OAuth flow.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/v2/oauth2/login?client_id={}&redirect_uri={}&response_type=code&scope=offline_access&state={}",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
        )
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<DexcomTokenResponse, AppError> {
        self.token_grant(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    /// Refresh-token grant.
    ///
    /// A 4xx here means the grant is invalid or revoked: the caller must
    /// mark the connection for reauthorization and must not retry with the
    /// same refresh token. Network errors and 5xx are transient.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<DexcomTokenResponse, AppError> {
        self.token_grant(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn token_grant(
        &self,
        form: &[(&str, &str)],
    ) -> Result<DexcomTokenResponse, AppError> {
        let url = format!("{}/v2/oauth2/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("token request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            // Do not include the response body: some providers echo the
            // rejected refresh token back.
            tracing::warn!(status = %status, "Dexcom rejected token grant");
            return Err(AppError::ReauthRequired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Transient(format!(
                "token endpoint returned HTTP {}: {}",
                status,
                body.chars().take(128).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Transient(format!("token response parse error: {}", e)))
    }

    /// Fetch EGVs for one window slice.
    async fn fetch_slice(
        &self,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DexcomEgv>, AppError> {
        let url = format!("{}/v3/users/self/egvs", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("startDate", start.format("%Y-%m-%dT%H:%M:%S").to_string()),
                ("endDate", end.format("%Y-%m-%dT%H:%M:%S").to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("EGV request failed: {}", e)))?;

        let response = reject_non_success(response).await?;
        let status = response.status().as_u16();

        // A 2xx non-JSON body is a parse failure, not "zero records".
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Transient(format!("EGV body read failed: {}", e)))?;

        let envelope: DexcomEnvelope = serde_json::from_str(&body).map_err(|e| {
            AppError::Upstream {
                status,
                body: format!("JSON parse error: {}", e),
            }
        })?;

        Ok(envelope.into_records())
    }
}

#[async_trait]
impl GlucoseProvider for DexcomClient {
    async fn fetch_window(
        &self,
        credential: &str,
        window: &SyncWindow,
    ) -> Result<Vec<RawReading>, AppError> {
        let mut records = Vec::new();
        let mut slice_start = window.start;

        while slice_start < window.end {
            let slice_end =
                (slice_start + Duration::days(MAX_WINDOW_DAYS)).min(window.end);
            let slice = self.fetch_slice(credential, slice_start, slice_end).await?;

            tracing::debug!(
                count = slice.len(),
                start = %slice_start,
                end = %slice_end,
                "Fetched Dexcom EGV slice"
            );

            records.extend(slice.into_iter().map(RawReading::Dexcom));
            slice_start = slice_end;
        }

        Ok(records)
    }
}

/// Response envelope variance across Dexcom API versions: v3 returns
/// `{"records": [...]}`, older deployments `{"egvs": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DexcomEnvelope {
    Records { records: Vec<DexcomEgv> },
    Egvs { egvs: Vec<DexcomEgv> },
}

impl DexcomEnvelope {
    fn into_records(self) -> Vec<DexcomEgv> {
        match self {
            DexcomEnvelope::Records { records } => records,
            DexcomEnvelope::Egvs { egvs } => egvs,
        }
    }
}

/// One raw EGV record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexcomEgv {
    #[serde(default)]
    pub record_id: Option<String>,
    /// Reading time in device (UTC) clock, ISO without offset in v2
    #[serde(default)]
    pub system_time: Option<String>,
    #[serde(default)]
    pub display_time: Option<String>,
    /// Glucose in mg/dL
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub trend: Option<String>,
}

/// Token grant response.
#[derive(Debug, Clone, Deserialize)]
pub struct DexcomTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
}

impl DexcomTokenResponse {
    /// Absolute expiry instant for storage.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.expires_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_accepts_records_shape() {
        let body = r#"{"records":[{"recordId":"r1","systemTime":"2026-01-02T03:04:05","value":110.0,"trend":"flat"}]}"#;
        let envelope: DexcomEnvelope = serde_json::from_str(body).unwrap();
        let records = envelope.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id.as_deref(), Some("r1"));
        assert_eq!(records[0].value, Some(110.0));
    }

    #[test]
    fn envelope_accepts_egvs_shape() {
        let body = r#"{"egvs":[{"systemTime":"2026-01-02T03:04:05","value":95}]}"#;
        let envelope: DexcomEnvelope = serde_json::from_str(body).unwrap();
        let records = envelope.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, None);
        assert_eq!(records[0].value, Some(95.0));
    }

    #[test]
    fn non_json_body_is_rejected() {
        let result: Result<DexcomEnvelope, _> = serde_json::from_str("<html>oops</html>");
        assert!(result.is_err());
    }

    #[test]
    fn authorize_url_carries_state_and_scope() {
        let client = DexcomClient::new(
            "https://sandbox-api.dexcom.com".to_string(),
            "cid".to_string(),
            "secret".to_string(),
        );
        let url = client.authorize_url("https://app.example.com/cb", "opaque123");
        assert!(url.starts_with("https://sandbox-api.dexcom.com/v2/oauth2/login?"));
        assert!(url.contains("scope=offline_access"));
        assert!(url.contains("state=opaque123"));
        assert!(url.contains("response_type=code"));
    }
}
