//! Latest observed pool state per token
//!
//! Written by ingest, read by sessions. Each entry is a handful of atomics
//! plus an `ArcSwap` of the last pool payload, so readers never wait on the
//! writer.

use crate::types::{AtomicF64, PoolData, SwapEvent, Venue};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct PoolState {
    pub token: Pubkey,
    pool: ArcSwap<PoolData>,
    price: AtomicF64,
    slot: AtomicU64,
}

impl PoolState {
    fn new(token: Pubkey, pool: PoolData, slot: u64) -> Self {
        Self {
            token,
            price: AtomicF64::new(pool.display_price()),
            pool: ArcSwap::from_pointee(pool),
            slot: AtomicU64::new(slot),
        }
    }

    pub fn pool(&self) -> PoolData {
        **self.pool.load()
    }

    pub fn venue(&self) -> Venue {
        self.pool.load().venue()
    }

    pub fn price(&self) -> f64 {
        self.price.load()
    }

    pub fn slot(&self) -> u64 {
        self.slot.load(Ordering::Acquire)
    }

    /// Apply a newer observation; stale slots are ignored
    fn update(&self, pool: PoolData, slot: u64) -> bool {
        if self.slot.fetch_max(slot, Ordering::AcqRel) > slot {
            return false;
        }
        self.pool.store(Arc::new(pool));
        self.price.store(pool.display_price());
        true
    }
}

#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<Pubkey, Arc<PoolState>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pool payload carried by `event`, if any
    pub fn observe(&self, event: &SwapEvent) -> Option<Arc<PoolState>> {
        let pool = event.pool?;
        let token = event.token_mint();
        let state = self
            .pools
            .entry(token)
            .or_insert_with(|| Arc::new(PoolState::new(token, pool, event.slot)))
            .clone();
        state.update(pool, event.slot);
        Some(state)
    }

    pub fn get(&self, token: &Pubkey) -> Option<Arc<PoolState>> {
        self.pools.get(token).map(|entry| Arc::clone(entry.value()))
    }

    pub fn price(&self, token: &Pubkey) -> Option<f64> {
        self.get(token).map(|state| state.price())
    }

    pub fn remove(&self, token: &Pubkey) {
        self.pools.remove(token);
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
