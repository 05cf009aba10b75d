// SPDX-License-Identifier: MIT

//! Per-(user, provider) sync leases.
//!
//! At most one sync may be in flight for a (user, provider) pair. The lease
//! carries a TTL slightly longer than the worst-case sync duration so a
//! crashed holder cannot wedge the pair forever; an expired lease is simply
//! reclaimed by the next acquirer.

use crate::models::Provider;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default lease TTL; must exceed the overall sync budget.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(180);

type LeaseKey = (String, Provider);

/// In-process lease table.
#[derive(Clone, Default)]
pub struct SyncLeases {
    inner: Arc<DashMap<LeaseKey, Instant>>,
}

impl SyncLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lease for (user, provider).
    ///
    /// Returns `None` while another holder's unexpired lease exists; a
    /// second concurrent sync for the same pair is rejected, never run in
    /// parallel.
    pub fn acquire(&self, user_id: &str, provider: Provider, ttl: Duration) -> Option<LeaseGuard> {
        let key = (user_id.to_string(), provider);
        let now = Instant::now();
        let expires_at = now + ttl;

        // entry() holds the shard lock, making check-and-set atomic.
        match self.inner.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    return None;
                }
                occupied.insert(expires_at);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(expires_at);
            }
        }

        Some(LeaseGuard {
            leases: self.inner.clone(),
            key,
            expires_at,
        })
    }

    /// Whether an unexpired lease is currently held.
    pub fn is_held(&self, user_id: &str, provider: Provider) -> bool {
        self.inner
            .get(&(user_id.to_string(), provider))
            .map(|expiry| *expiry > Instant::now())
            .unwrap_or(false)
    }
}

/// Releases the lease on drop.
///
/// Release only removes the entry if it still belongs to this guard, so a
/// slow holder that outlived its TTL cannot release a successor's lease.
pub struct LeaseGuard {
    leases: Arc<DashMap<LeaseKey, Instant>>,
    key: LeaseKey,
    expires_at: Instant,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.leases
            .remove_if(&self.key, |_, expiry| *expiry == self.expires_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_while_held() {
        let leases = SyncLeases::new();
        let guard = leases.acquire("u1", Provider::Dexcom, DEFAULT_LEASE_TTL);
        assert!(guard.is_some());
        assert!(leases
            .acquire("u1", Provider::Dexcom, DEFAULT_LEASE_TTL)
            .is_none());

        // A different pair is independent.
        assert!(leases
            .acquire("u1", Provider::Nightscout, DEFAULT_LEASE_TTL)
            .is_some());
        assert!(leases
            .acquire("u2", Provider::Dexcom, DEFAULT_LEASE_TTL)
            .is_some());
    }

    #[test]
    fn drop_releases_the_lease() {
        let leases = SyncLeases::new();
        {
            let _guard = leases
                .acquire("u1", Provider::Dexcom, DEFAULT_LEASE_TTL)
                .unwrap();
            assert!(leases.is_held("u1", Provider::Dexcom));
        }
        assert!(!leases.is_held("u1", Provider::Dexcom));
        assert!(leases
            .acquire("u1", Provider::Dexcom, DEFAULT_LEASE_TTL)
            .is_some());
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let leases = SyncLeases::new();
        let stale = leases
            .acquire("u1", Provider::Dexcom, Duration::from_millis(0))
            .unwrap();

        // TTL elapsed: the next acquirer wins even though the guard lives.
        std::thread::sleep(Duration::from_millis(5));
        let fresh = leases.acquire("u1", Provider::Dexcom, DEFAULT_LEASE_TTL);
        assert!(fresh.is_some());

        // The stale guard must not release the successor's lease.
        drop(stale);
        assert!(leases.is_held("u1", Provider::Dexcom));
    }
}
