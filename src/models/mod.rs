// SPDX-License-Identifier: MIT

//! Data models for connections, readings and sync outcomes.

pub mod connection;
pub mod reading;
pub mod sync;

pub use connection::{CgmConnection, NightscoutAuthScheme, Provider};
pub use reading::GlucoseReading;
pub use sync::{MergeOutcome, NormalizeOutcome, SkipCounts, SyncReport, SyncStatus, SyncWindow};
