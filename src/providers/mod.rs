// SPDX-License-Identifier: MIT

//! Provider adapters for upstream CGM APIs.
//!
//! Each adapter owns its envelope-unwrapping and auth quirks; adding a
//! provider means a new module plus a `RawReading` variant, nothing else.

pub mod dexcom;
pub mod nightscout;

pub use dexcom::{DexcomClient, DexcomEgv, DexcomTokenResponse};
pub use nightscout::{NightscoutClient, NightscoutEntry};

use crate::error::AppError;
use crate::models::SyncWindow;
use async_trait::async_trait;

/// Outbound HTTP timeout for provider calls.
pub const PROVIDER_HTTP_TIMEOUT_SECS: u64 = 30;

/// One raw record as returned by a provider, prior to normalization.
#[derive(Debug, Clone)]
pub enum RawReading {
    Dexcom(DexcomEgv),
    Nightscout(NightscoutEntry),
}

/// A provider capable of returning glucose telemetry for a time window.
///
/// `credential` is whatever the provider authenticates with: a Dexcom
/// access token, or the Nightscout token/secret already configured on
/// the client.
#[async_trait]
pub trait GlucoseProvider: Send + Sync {
    async fn fetch_window(
        &self,
        credential: &str,
        window: &SyncWindow,
    ) -> Result<Vec<RawReading>, AppError>;
}

/// Shared helper: map a non-2xx provider response to an error, never to an
/// empty record list.
pub(crate) async fn reject_non_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(AppError::upstream(status.as_u16(), &body))
}
