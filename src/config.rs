// SPDX-License-Identifier: MIT

//! Application configuration loaded from environment variables.
//!
//! Secrets (Dexcom client secret, JWT signing key) are read once at startup
//! and cached in memory. A missing credential is a `ConfigError`, fatal and
//! distinct from any per-user error.

use std::env;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Dexcom OAuth client ID (public)
    pub dexcom_client_id: String,
    /// Dexcom API base URL (sandbox or production)
    pub dexcom_base_url: String,
    /// Public base URL of this service, used for OAuth redirect URIs
    pub api_url: String,
    /// Frontend URL for post-OAuth redirects and CORS
    pub frontend_url: String,
    /// SQLite database URL
    pub database_url: String,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// Dexcom OAuth client secret
    pub dexcom_client_secret: String,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            dexcom_client_id: env::var("DEXCOM_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("DEXCOM_CLIENT_ID"))?,
            dexcom_base_url: env::var("DEXCOM_BASE_URL")
                .unwrap_or_else(|_| "https://api.dexcom.com".to_string()),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://cgm_sync.db".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),

            dexcom_client_secret: env::var("DEXCOM_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("DEXCOM_CLIENT_SECRET"))?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
        })
    }

    /// Default config for tests.
    pub fn test_default() -> Self {
        Self {
            dexcom_client_id: "test_client_id".to_string(),
            dexcom_base_url: "https://sandbox-api.dexcom.com".to_string(),
            api_url: "http://localhost:8080".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            database_url: "sqlite::memory:".to_string(),
            port: 8080,
            dexcom_client_secret: "test_secret".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("DEXCOM_CLIENT_ID", "test_id");
        env::set_var("DEXCOM_CLIENT_SECRET", "test_secret");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.dexcom_client_id, "test_id");
        assert_eq!(config.dexcom_client_secret, "test_secret");
        assert_eq!(config.port, 8080);
    }
}
