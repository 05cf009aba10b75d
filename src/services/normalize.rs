// SPDX-License-Identifier: MIT

//! Normalization of raw provider records into canonical readings.
//!
//! Pure and synchronous. Records that cannot be normalized are skipped and
//! counted per reason; they are never defaulted (a missing timestamp does
//! not become "now") and never silently dropped.

use crate::models::{GlucoseReading, NormalizeOutcome, Provider, SkipCounts};
use crate::providers::{DexcomEgv, NightscoutEntry, RawReading};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Why a single record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingTimestamp,
    BadTimestamp,
    BadValue,
    WrongKind,
}

/// Normalize one raw record.
pub fn normalize(user_id: &str, raw: &RawReading) -> Result<GlucoseReading, SkipReason> {
    match raw {
        RawReading::Dexcom(egv) => normalize_dexcom(user_id, egv),
        RawReading::Nightscout(entry) => normalize_nightscout(user_id, entry),
    }
}

/// Normalize a whole fetch result, accumulating skip counts.
pub fn normalize_batch(user_id: &str, raw: Vec<RawReading>) -> NormalizeOutcome {
    let mut readings = Vec::with_capacity(raw.len());
    let mut skipped = SkipCounts::default();

    for record in &raw {
        match normalize(user_id, record) {
            Ok(reading) => readings.push(reading),
            Err(SkipReason::MissingTimestamp) => skipped.missing_timestamp += 1,
            Err(SkipReason::BadTimestamp) => skipped.bad_timestamp += 1,
            Err(SkipReason::BadValue) => skipped.bad_value += 1,
            Err(SkipReason::WrongKind) => skipped.wrong_kind += 1,
        }
    }

    if skipped.total() > 0 {
        tracing::warn!(
            user_id,
            skipped = skipped.total(),
            missing_timestamp = skipped.missing_timestamp,
            bad_timestamp = skipped.bad_timestamp,
            bad_value = skipped.bad_value,
            wrong_kind = skipped.wrong_kind,
            "Skipped records during normalization"
        );
    }

    NormalizeOutcome { readings, skipped }
}

fn normalize_dexcom(user_id: &str, egv: &DexcomEgv) -> Result<GlucoseReading, SkipReason> {
    let raw_time = egv
        .system_time
        .as_deref()
        .or(egv.display_time.as_deref())
        .ok_or(SkipReason::MissingTimestamp)?;

    let device_time = parse_provider_time(raw_time).ok_or(SkipReason::BadTimestamp)?;
    let value_mgdl = finite_positive(egv.value).ok_or(SkipReason::BadValue)?;

    Ok(GlucoseReading {
        user_id: user_id.to_string(),
        device_time,
        value_mgdl,
        trend: egv.trend.clone(),
        source: Provider::Dexcom,
        external_id: egv.record_id.clone(),
        created_at: Utc::now(),
    })
}

fn normalize_nightscout(
    user_id: &str,
    entry: &NightscoutEntry,
) -> Result<GlucoseReading, SkipReason> {
    // The sgv.json endpoint should only return sensor readings, but a
    // misconfigured instance can mix in calibrations and meter values.
    if let Some(kind) = entry.kind.as_deref() {
        if kind != "sgv" {
            return Err(SkipReason::WrongKind);
        }
    }

    let millis = entry.date.ok_or(SkipReason::MissingTimestamp)?;
    let device_time =
        DateTime::<Utc>::from_timestamp_millis(millis).ok_or(SkipReason::BadTimestamp)?;
    let value_mgdl = finite_positive(entry.sgv).ok_or(SkipReason::BadValue)?;

    Ok(GlucoseReading {
        user_id: user_id.to_string(),
        device_time,
        value_mgdl,
        trend: entry.direction.clone(),
        source: Provider::Nightscout,
        external_id: entry.id.clone(),
        created_at: Utc::now(),
    })
}

/// Dexcom timestamps come as ISO datetimes, with or without an offset.
/// Naive timestamps (systemTime) are device-UTC.
fn parse_provider_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn finite_positive(value: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Some(v),
        _ => None,
    }
}
