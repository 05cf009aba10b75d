// SPDX-License-Identifier: MIT

//! Nightscout API client.
//!
//! Nightscout is self-hosted and loosely specified: entries come back as a
//! bare JSON array (no envelope), time filtering uses Mongo-style
//! `find[date][$gte]` query syntax on epoch milliseconds, and auth is either
//! a `?token=` query parameter or an `api-secret` header carrying the SHA-1
//! hex of the shared secret.

use crate::error::AppError;
use crate::models::{NightscoutAuthScheme, SyncWindow};
use crate::providers::{reject_non_success, GlucoseProvider, RawReading, PROVIDER_HTTP_TIMEOUT_SECS};
use async_trait::async_trait;
use serde::Deserialize;
use sha1::{Digest, Sha1};

/// Page size for entry queries; a full page triggers backwards paging.
const PAGE_LIMIT: usize = 1000;

/// Hard cap on pages per window. Hitting it reports truncation instead of
/// silently dropping older records.
const MAX_PAGES: usize = 20;

/// Nightscout API client for one instance.
#[derive(Clone)]
pub struct NightscoutClient {
    http: reqwest::Client,
    base_url: String,
    scheme: NightscoutAuthScheme,
}

impl NightscoutClient {
    pub fn new(base_url: &str, scheme: NightscoutAuthScheme) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            scheme,
        }
    }

    /// SHA-1 hex digest the `api-secret` header expects.
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Fetch one page of sensor-glucose entries in `[gte_ms, lte_ms]`,
    /// newest first.
    async fn fetch_page(
        &self,
        credential: &str,
        gte_ms: i64,
        lte_ms: i64,
    ) -> Result<Vec<NightscoutEntry>, AppError> {
        let url = format!("{}/api/v1/entries/sgv.json", self.base_url);

        let mut request = self.http.get(&url).query(&[
            ("find[date][$gte]", gte_ms.to_string()),
            ("find[date][$lte]", lte_ms.to_string()),
            ("count", PAGE_LIMIT.to_string()),
        ]);

        request = match self.scheme {
            NightscoutAuthScheme::Token => request.query(&[("token", credential)]),
            NightscoutAuthScheme::ApiSecret => {
                request.header("api-secret", Self::hash_secret(credential))
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("entries request failed: {}", e)))?;

        let response = reject_non_success(response).await?;
        let status = response.status().as_u16();

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Transient(format!("entries body read failed: {}", e)))?;

        // Bare array, not an envelope. Non-JSON is a parse failure, never
        // "zero records".
        serde_json::from_str(&body).map_err(|e| AppError::Upstream {
            status,
            body: format!("JSON parse error: {}", e),
        })
    }

    /// Smoke-test credentials by fetching the most recent entries.
    pub async fn verify(&self, credential: &str) -> Result<(), AppError> {
        let url = format!("{}/api/v1/entries/sgv.json", self.base_url);

        let mut request = self.http.get(&url).query(&[("count", "2")]);
        request = match self.scheme {
            NightscoutAuthScheme::Token => request.query(&[("token", credential)]),
            NightscoutAuthScheme::ApiSecret => {
                request.header("api-secret", Self::hash_secret(credential))
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("verification request failed: {}", e)))?;

        reject_non_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl GlucoseProvider for NightscoutClient {
    async fn fetch_window(
        &self,
        credential: &str,
        window: &SyncWindow,
    ) -> Result<Vec<RawReading>, AppError> {
        let gte_ms = window.start.timestamp_millis();
        let mut lte_ms = window.end.timestamp_millis();
        let mut entries: Vec<NightscoutEntry> = Vec::new();

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(credential, gte_ms, lte_ms).await?;
            let full_page = page.len() >= PAGE_LIMIT;
            let oldest = page.iter().filter_map(|e| e.date).min();

            tracing::debug!(count = page.len(), full_page, "Fetched Nightscout page");
            entries.extend(page);

            if !full_page {
                return Ok(entries.into_iter().map(RawReading::Nightscout).collect());
            }

            // Page backwards, keeping the boundary timestamp: entries that
            // share the oldest date may straddle the page cut, so the next
            // page re-fetches the boundary and dedup absorbs the repeats.
            match oldest {
                Some(oldest) => lte_ms = oldest,
                None => return Ok(entries.into_iter().map(RawReading::Nightscout).collect()),
            }
        }

        // Too dense for the page budget; report truncation so the caller
        // can narrow the window rather than lose older records.
        Err(AppError::Transient(format!(
            "entries window truncated after {} pages; narrow the window and retry",
            MAX_PAGES
        )))
    }
}

/// One raw Nightscout entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NightscoutEntry {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    /// Reading time, epoch milliseconds
    #[serde(default)]
    pub date: Option<i64>,
    /// Sensor glucose value in mg/dL
    #[serde(default)]
    pub sgv: Option<f64>,
    /// Trend vocabulary differs from Dexcom's; passed through opaquely
    #[serde(default)]
    pub direction: Option<String>,
    /// Entry kind; only "sgv" entries are glucose readings
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}
