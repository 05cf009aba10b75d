// SPDX-License-Identifier: MIT

//! Provider connection model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported CGM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Dexcom,
    Nightscout,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Dexcom => "dexcom",
            Provider::Nightscout => "nightscout",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dexcom" => Ok(Provider::Dexcom),
            "nightscout" => Ok(Provider::Nightscout),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// How a Nightscout instance authenticates us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightscoutAuthScheme {
    /// `?token=` query parameter (access token / role token)
    Token,
    /// `api-secret` header carrying the SHA-1 hex of the shared secret
    ApiSecret,
}

impl NightscoutAuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            NightscoutAuthScheme::Token => "token",
            NightscoutAuthScheme::ApiSecret => "api_secret",
        }
    }
}

impl FromStr for NightscoutAuthScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token" => Ok(NightscoutAuthScheme::Token),
            "api_secret" => Ok(NightscoutAuthScheme::ApiSecret),
            other => Err(format!("unknown auth scheme: {}", other)),
        }
    }
}

/// One stored CGM connection, unique per (user_id, provider).
///
/// Dexcom connections carry the OAuth triple (access, refresh, expiry).
/// Nightscout connections carry `provider_url` plus the secret in
/// `access_token`; refresh_token and expires_at stay `None` since a
/// Nightscout token does not expire or rotate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgmConnection {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Nightscout base URL (e.g. `https://my-site.example.com`)
    pub provider_url: Option<String>,
    /// Nightscout auth scheme; `None` for OAuth providers
    pub auth_scheme: Option<NightscoutAuthScheme>,
    /// Watermark: how far syncing has progressed
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_enabled: bool,
    /// Set when the provider rejected our refresh token; cleared on reconnect
    pub needs_reauth: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CgmConnection {
    /// New Dexcom connection from a completed OAuth exchange.
    pub fn new_dexcom(
        user_id: &str,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            provider: Provider::Dexcom,
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            expires_at: Some(expires_at),
            provider_url: None,
            auth_scheme: None,
            last_sync_at: None,
            sync_enabled: true,
            needs_reauth: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// New Nightscout connection from user-supplied URL and secret.
    pub fn new_nightscout(
        user_id: &str,
        url: String,
        secret: String,
        scheme: NightscoutAuthScheme,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            provider: Provider::Nightscout,
            access_token: Some(secret),
            refresh_token: None,
            expires_at: None,
            provider_url: Some(url),
            auth_scheme: Some(scheme),
            last_sync_at: None,
            sync_enabled: true,
            needs_reauth: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips_through_str() {
        assert_eq!("dexcom".parse::<Provider>().unwrap(), Provider::Dexcom);
        assert_eq!(
            "nightscout".parse::<Provider>().unwrap(),
            Provider::Nightscout
        );
        assert!("libre".parse::<Provider>().is_err());
        assert_eq!(Provider::Dexcom.as_str(), "dexcom");
    }
}
