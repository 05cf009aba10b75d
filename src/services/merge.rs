// SPDX-License-Identifier: MIT

//! Idempotent, bounded-batch persistence of canonical readings.
//!
//! Pure data-layer logic: no OAuth, no HTTP. Dedup is enforced by the
//! storage uniqueness keys (external_id when present, else the composite
//! (user_id, device_time, source)) combined with conflict-ignore inserts.

use crate::db::SqliteStore;
use crate::error::AppError;
use crate::models::{GlucoseReading, MergeOutcome};

/// Storage batch-insert bound (realistic backend batch limits).
pub const MAX_BATCH_SIZE: usize = 500;

/// Merges readings into storage in bounded batches.
#[derive(Clone)]
pub struct ReadingMerger {
    store: SqliteStore,
}

impl ReadingMerger {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Upsert readings with ignore-on-conflict semantics.
    ///
    /// A failed batch rolls back only itself: prior batches stay committed
    /// and later batches still run, so the outcome reports exact per-row
    /// counts. Re-submitting already-present readings neither errors nor
    /// creates new rows.
    pub async fn merge(&self, readings: &[GlucoseReading]) -> Result<MergeOutcome, AppError> {
        let mut outcome = MergeOutcome::default();

        for batch in readings.chunks(MAX_BATCH_SIZE) {
            match self.store.insert_readings(batch).await {
                Ok((inserted, duplicates)) => {
                    outcome.inserted += inserted;
                    outcome.skipped_duplicates += duplicates;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        batch_len = batch.len(),
                        "Reading batch failed to commit"
                    );
                    outcome.failed += batch.len();
                }
            }
        }

        Ok(outcome)
    }
}
