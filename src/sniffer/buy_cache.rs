//! Small FIFO of recently bought tokens
//!
//! Separate from the signature deduper: this one is keyed by token, holds a
//! handful of entries and forgets them after a TTL.

use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct BuyCache {
    entries: Mutex<VecDeque<(Pubkey, Instant)>>,
    capacity: usize,
    ttl: Duration,
}

impl BuyCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            ttl,
        }
    }

    /// Insert `token` unless present; true when inserted
    pub fn insert_if_absent(&self, token: Pubkey) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|(_, at)| now.duration_since(*at) < self.ttl);
        if entries.iter().any(|(t, _)| *t == token) {
            return false;
        }
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((token, now));
        true
    }

    pub fn contains(&self, token: &Pubkey) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .any(|(t, at)| t == token && now.duration_since(*at) < self.ttl)
    }

    pub fn remove(&self, token: &Pubkey) {
        self.entries.lock().retain(|(t, _)| t != token);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
