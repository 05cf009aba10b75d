// SPDX-License-Identifier: MIT

//! Canonical glucose reading model.

use crate::models::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One canonical CGM reading, as persisted.
///
/// Uniqueness: no two rows share (user_id, device_time, source), nor the same
/// (user_id, source, external_id) when an external id is present. Rows are
/// created only by the merger and never mutated or deleted by sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlucoseReading {
    pub user_id: String,
    /// Provider-reported reading time (UTC)
    pub device_time: DateTime<Utc>,
    /// Blood glucose in mg/dL; always finite and positive
    pub value_mgdl: f64,
    /// Opaque provider trend token (e.g. "flat", "FortyFiveUp"); no
    /// semantic interpretation is done here
    pub trend: Option<String>,
    pub source: Provider,
    /// Provider record id when the provider supplies one
    pub external_id: Option<String>,
    /// Ingestion time
    pub created_at: DateTime<Utc>,
}
