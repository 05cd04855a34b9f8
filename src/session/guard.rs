//! Pre-buy resource guard
//!
//! Checks run before any network call: the concurrent buy ceiling, the
//! blacklist of the first tracked wallet, and a per-token cooldown. A pass
//! reserves both the count and the cooldown. The reservation is released
//! when the permit drops unless the buy was committed.

use crate::hot_config::HotSnapshot;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error("concurrent buy ceiling reached")]
    Ceiling,
    #[error("tracked wallet is blacklisted")]
    Blacklisted,
    #[error("token is still cooling down")]
    Cooldown,
}

pub struct BuyGuard {
    count: AtomicU64,
    max: u64,
    cooldown: Duration,
    last_buy: DashMap<Pubkey, Instant>,
}

impl BuyGuard {
    pub fn new(max: u64, cooldown: Duration) -> Self {
        Self {
            count: AtomicU64::new(0),
            max,
            cooldown,
            last_buy: DashMap::new(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn acquire(
        self: &Arc<Self>,
        token: Pubkey,
        first_tracked: Option<&Pubkey>,
        hot: &HotSnapshot,
    ) -> Result<BuyPermit, GuardRejection> {
        if self.count() >= self.max {
            return Err(GuardRejection::Ceiling);
        }
        if first_tracked.is_some_and(|wallet| hot.is_blacklisted(wallet)) {
            return Err(GuardRejection::Blacklisted);
        }

        let now = Instant::now();
        match self.last_buy.entry(token) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) < self.cooldown {
                    return Err(GuardRejection::Cooldown);
                }
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }

        let max = self.max;
        if self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| (c < max).then_some(c + 1))
            .is_err()
        {
            self.last_buy.remove(&token);
            return Err(GuardRejection::Ceiling);
        }

        Ok(BuyPermit {
            guard: Arc::clone(self),
            token,
            committed: false,
        })
    }

    fn release_count(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1)));
    }
}

/// Reservation held while the buy is in flight
#[must_use = "dropping the permit releases the reservation"]
pub struct BuyPermit {
    guard: Arc<BuyGuard>,
    token: Pubkey,
    committed: bool,
}

impl BuyPermit {
    /// The buy landed: keep the cooldown and hold the count until the slot drops
    pub fn commit(mut self) -> BuySlot {
        self.committed = true;
        self.guard.last_buy.insert(self.token, Instant::now());
        BuySlot {
            guard: Arc::clone(&self.guard),
        }
    }
}

impl Drop for BuyPermit {
    fn drop(&mut self) {
        if !self.committed {
            debug!(token = %self.token, "Releasing buy reservation");
            self.guard.release_count();
            self.guard.last_buy.remove(&self.token);
        }
    }
}

/// Counts toward the buy ceiling for as long as the position is open
pub struct BuySlot {
    guard: Arc<BuyGuard>,
}

impl Drop for BuySlot {
    fn drop(&mut self) {
        self.guard.release_count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(max: u64) -> Arc<BuyGuard> {
        Arc::new(BuyGuard::new(max, Duration::from_secs(2)))
    }

    #[test]
    fn test_dropped_permit_releases_everything() {
        let guard = guard(10);
        let token = Pubkey::new_unique();
        let permit = guard.acquire(token, None, &HotSnapshot::default()).unwrap();
        assert_eq!(guard.count(), 1);
        assert_eq!(
            guard.acquire(token, None, &HotSnapshot::default()).err(),
            Some(GuardRejection::Cooldown)
        );
        drop(permit);
        assert_eq!(guard.count(), 0);
        assert!(guard.acquire(token, None, &HotSnapshot::default()).is_ok());
    }

    #[test]
    fn test_committed_slot_keeps_cooldown() {
        let guard = guard(10);
        let token = Pubkey::new_unique();
        let slot = guard
            .acquire(token, None, &HotSnapshot::default())
            .unwrap()
            .commit();
        assert_eq!(guard.count(), 1);
        drop(slot);
        assert_eq!(guard.count(), 0);
        assert_eq!(
            guard.acquire(token, None, &HotSnapshot::default()).err(),
            Some(GuardRejection::Cooldown)
        );
    }

    #[test]
    fn test_ceiling() {
        let guard = guard(1);
        let _held = guard
            .acquire(Pubkey::new_unique(), None, &HotSnapshot::default())
            .unwrap();
        let other = Pubkey::new_unique();
        assert_eq!(
            guard.acquire(other, None, &HotSnapshot::default()).err(),
            Some(GuardRejection::Ceiling)
        );
    }

    #[test]
    fn test_blacklisted_tracked_wallet() {
        let guard = guard(10);
        let dev = Pubkey::new_unique();
        let mut hot = HotSnapshot::default();
        hot.blacklist.insert(dev);
        assert_eq!(
            guard.acquire(Pubkey::new_unique(), Some(&dev), &hot).err(),
            Some(GuardRejection::Blacklisted)
        );
        assert_eq!(guard.count(), 0);
    }
}
