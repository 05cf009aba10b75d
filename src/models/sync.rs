// SPDX-License-Identifier: MIT

//! Sync window and outcome types.

use crate::models::GlucoseReading;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Inclusive fetch window `[start, end]` for one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of one bounded-batch merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Rows newly inserted
    pub inserted: usize,
    /// Rows already present (conflict-ignored)
    pub skipped_duplicates: usize,
    /// Rows in batches that failed to commit
    pub failed: usize,
}

impl MergeOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.skipped_duplicates + self.failed
    }
}

/// Per-reason counts of records dropped during normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub missing_timestamp: usize,
    pub bad_timestamp: usize,
    pub bad_value: usize,
    /// Nightscout entries that are not sensor glucose values
    pub wrong_kind: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.missing_timestamp + self.bad_timestamp + self.bad_value + self.wrong_kind
    }
}

/// Result of normalizing a raw provider batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub readings: Vec<GlucoseReading>,
    pub skipped: SkipCounts,
}

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Every batch merged; watermark advanced
    Completed,
    /// Some batches failed; watermark NOT advanced, next run re-covers
    /// the same window (duplicate-safe re-fetch over data loss)
    Partial,
}

/// Summary of one end-to-end sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    /// Raw records fetched from the provider
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Records dropped during normalization
    pub skipped: usize,
    pub failed: usize,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}
