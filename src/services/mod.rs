// SPDX-License-Identifier: MIT

//! Business logic services.

pub mod connection;
pub mod lease;
pub mod merge;
pub mod normalize;
pub mod sync;
pub mod token;

pub use connection::{ConnectionService, ConnectionStatus};
pub use lease::{LeaseGuard, SyncLeases, DEFAULT_LEASE_TTL};
pub use merge::{ReadingMerger, MAX_BATCH_SIZE};
pub use sync::{SyncRequest, SyncService, DEFAULT_LOOKBACK_DAYS, OVERLAP_MINUTES};
pub use token::{RefreshLocks, TokenRefresher, REFRESH_BUFFER_SECS};
