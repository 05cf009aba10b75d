// SPDX-License-Identifier: MIT

//! Provider OAuth callback routes (public: the browser arrives here from
//! the provider's consent screen).

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::Result;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/dexcom/callback", get(dexcom_callback))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Dexcom OAuth callback: consume the one-time state, exchange the code,
/// store the connection, then bounce back to the frontend.
async fn dexcom_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    let frontend = state.config.frontend_url.trim_end_matches('/');

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from Dexcom");
        return Ok(Redirect::temporary(&format!(
            "{}/settings?error={}",
            frontend,
            urlencoding::encode(&error)
        )));
    }

    let (Some(oauth_state), Some(code)) = (params.state, params.code) else {
        return Ok(Redirect::temporary(&format!(
            "{}/settings?error=missing_callback_params",
            frontend
        )));
    };

    match state
        .connection_service
        .complete_dexcom_callback(&oauth_state, &code)
        .await
    {
        Ok(user_id) => {
            tracing::info!(user_id = %user_id, "Dexcom connected");
            Ok(Redirect::temporary(&format!(
                "{}/settings?connected=dexcom",
                frontend
            )))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dexcom connect failed");
            Ok(Redirect::temporary(&format!(
                "{}/settings?error=connect_failed",
                frontend
            )))
        }
    }
}
