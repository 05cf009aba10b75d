// SPDX-License-Identifier: MIT

//! The sync orchestrator: one end-to-end pipeline per (user, provider).
//!
//! Pipeline: lease -> window -> token check/refresh -> fetch -> normalize
//! -> merge -> watermark. The watermark advances only after a fully
//! successful merge; on any failure the next attempt re-covers the same
//! window, trading duplicate-safe re-fetch for guaranteed no data loss.

use crate::db::SqliteStore;
use crate::error::AppError;
use crate::models::{
    CgmConnection, NightscoutAuthScheme, Provider, SyncReport, SyncStatus, SyncWindow,
};
use crate::providers::{DexcomClient, GlucoseProvider, NightscoutClient};
use crate::services::lease::{SyncLeases, DEFAULT_LEASE_TTL};
use crate::services::merge::ReadingMerger;
use crate::services::normalize::normalize_batch;
use crate::services::token::TokenRefresher;
use chrono::{DateTime, Duration, Utc};

/// First-ever sync looks back this far.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Subsequent syncs start this much before the watermark to absorb clock
/// skew and late-arriving records.
pub const OVERLAP_MINUTES: i64 = 5;

/// Wall-clock budget for the fetch + merge pipeline.
pub const SYNC_BUDGET_SECS: u64 = 120;

/// Caller-supplied bounds for a manual or backfill sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncRequest {
    /// Fetch the last `days` days, overriding the watermark
    pub days: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Compute the fetch window for one sync run.
///
/// Explicit bounds win; then a `days` lookback; then the watermark minus
/// the overlap buffer; then the default lookback for a first-ever sync.
pub fn compute_window(
    last_sync_at: Option<DateTime<Utc>>,
    request: &SyncRequest,
    now: DateTime<Utc>,
) -> Result<SyncWindow, AppError> {
    let end = request.end_date.unwrap_or(now);

    let start = if let Some(start) = request.start_date {
        start
    } else if let Some(days) = request.days {
        if days <= 0 {
            return Err(AppError::BadRequest("days must be positive".to_string()));
        }
        end - Duration::days(days)
    } else if let Some(watermark) = last_sync_at {
        watermark - Duration::minutes(OVERLAP_MINUTES)
    } else {
        end - Duration::days(DEFAULT_LOOKBACK_DAYS)
    };

    if start >= end {
        return Err(AppError::BadRequest(
            "start_date must be before end_date".to_string(),
        ));
    }

    Ok(SyncWindow { start, end })
}

/// Drives syncs for all connections.
#[derive(Clone)]
pub struct SyncService {
    store: SqliteStore,
    dexcom: DexcomClient,
    refresher: TokenRefresher,
    merger: ReadingMerger,
    leases: SyncLeases,
}

impl SyncService {
    pub fn new(
        store: SqliteStore,
        dexcom: DexcomClient,
        refresher: TokenRefresher,
        leases: SyncLeases,
    ) -> Self {
        let merger = ReadingMerger::new(store.clone());
        Self {
            store,
            dexcom,
            refresher,
            merger,
            leases,
        }
    }

    /// Run one sync for (user, provider).
    pub async fn run(
        &self,
        user_id: &str,
        provider: Provider,
        request: SyncRequest,
    ) -> Result<SyncReport, AppError> {
        // One pipeline per pair; a concurrent trigger is rejected, never
        // run in parallel (duplicate upstream calls, watermark races).
        let _lease = self
            .leases
            .acquire(user_id, provider, DEFAULT_LEASE_TTL)
            .ok_or(AppError::SyncInProgress)?;

        let connection = self
            .store
            .get_connection(user_id, provider)
            .await?
            .ok_or_else(|| AppError::NotConnected(provider.to_string()))?;

        if connection.needs_reauth {
            return Err(AppError::ReauthRequired);
        }
        if !connection.sync_enabled {
            return Err(AppError::SyncDisabled);
        }

        let window = compute_window(connection.last_sync_at, &request, Utc::now())?;
        let credential = self.refresher.ensure_valid(&connection).await?;

        tracing::info!(
            user_id,
            provider = %provider,
            start = %window.start,
            end = %window.end,
            "Starting sync"
        );

        let pipeline = self.fetch_and_merge(&connection, &credential, &window);
        let (fetched, outcome, merge) = tokio::time::timeout(
            std::time::Duration::from_secs(SYNC_BUDGET_SECS),
            pipeline,
        )
        .await
        .map_err(|_| AppError::Transient("sync exceeded wall-clock budget".to_string()))??;

        let status = if merge.failed == 0 {
            // Re-checked at write time: a disconnect racing this sync makes
            // the UPDATE a no-op and the watermark update is discarded (the
            // merged readings remain, history outlives the connection).
            let advanced = self
                .store
                .advance_watermark(user_id, provider, window.end)
                .await?;
            if !advanced {
                tracing::warn!(
                    user_id,
                    provider = %provider,
                    "Connection deleted mid-sync, watermark update discarded"
                );
            }
            SyncStatus::Completed
        } else {
            tracing::warn!(
                user_id,
                provider = %provider,
                failed = merge.failed,
                "Partial merge, watermark not advanced"
            );
            SyncStatus::Partial
        };

        let report = SyncReport {
            status,
            fetched,
            inserted: merge.inserted,
            duplicates: merge.skipped_duplicates,
            skipped: outcome,
            failed: merge.failed,
            start_date: window.start,
            end_date: window.end,
        };

        tracing::info!(
            user_id,
            provider = %provider,
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            failed = report.failed,
            "Sync finished"
        );

        Ok(report)
    }

    /// Fetch, normalize and merge one window.
    ///
    /// Returns (raw records fetched, normalization skips, merge outcome).
    async fn fetch_and_merge(
        &self,
        connection: &CgmConnection,
        credential: &str,
        window: &SyncWindow,
    ) -> Result<(usize, usize, crate::models::MergeOutcome), AppError> {
        let adapter = self.adapter_for(connection)?;
        let raw = adapter.fetch_window(credential, window).await?;
        let fetched = raw.len();

        let normalized = normalize_batch(&connection.user_id, raw);
        let skipped = normalized.skipped.total();

        let merge = self.merger.merge(&normalized.readings).await?;
        Ok((fetched, skipped, merge))
    }

    /// Pick the adapter variant for a connection.
    fn adapter_for(
        &self,
        connection: &CgmConnection,
    ) -> Result<Box<dyn GlucoseProvider>, AppError> {
        match connection.provider {
            Provider::Dexcom => Ok(Box::new(self.dexcom.clone())),
            Provider::Nightscout => {
                let url = connection
                    .provider_url
                    .as_deref()
                    .ok_or(AppError::ReauthRequired)?;
                let scheme = connection
                    .auth_scheme
                    .unwrap_or(NightscoutAuthScheme::Token);
                Ok(Box::new(NightscoutClient::new(url, scheme)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn first_sync_uses_default_lookback() {
        let now = at(12, 0);
        let window = compute_window(None, &SyncRequest::default(), now).unwrap();
        assert_eq!(window.end, now);
        assert_eq!(window.start, now - Duration::days(DEFAULT_LOOKBACK_DAYS));
    }

    #[test]
    fn watermark_sync_overlaps_by_buffer() {
        let now = at(12, 0);
        let watermark = at(11, 0);
        let window = compute_window(Some(watermark), &SyncRequest::default(), now).unwrap();
        assert_eq!(window.start, watermark - Duration::minutes(OVERLAP_MINUTES));
        assert_eq!(window.end, now);
    }

    #[test]
    fn explicit_range_wins_over_watermark() {
        let now = at(12, 0);
        let request = SyncRequest {
            days: None,
            start_date: Some(at(1, 0)),
            end_date: Some(at(2, 0)),
        };
        let window = compute_window(Some(at(11, 0)), &request, now).unwrap();
        assert_eq!(window.start, at(1, 0));
        assert_eq!(window.end, at(2, 0));
    }

    #[test]
    fn days_lookback_overrides_watermark() {
        let now = at(12, 0);
        let request = SyncRequest {
            days: Some(3),
            ..Default::default()
        };
        let window = compute_window(Some(at(11, 0)), &request, now).unwrap();
        assert_eq!(window.start, now - Duration::days(3));
        assert_eq!(window.end, now);
    }

    #[test]
    fn degenerate_windows_are_rejected() {
        let now = at(12, 0);
        let backwards = SyncRequest {
            days: None,
            start_date: Some(at(2, 0)),
            end_date: Some(at(1, 0)),
        };
        assert!(compute_window(None, &backwards, now).is_err());

        let zero_days = SyncRequest {
            days: Some(0),
            ..Default::default()
        };
        assert!(compute_window(None, &zero_days, now).is_err());
    }
}
