//! Rotating pool of durable nonce accounts
//!
//! Each slot holds the last nonce value seen for its account. Refresh workers
//! write; the buy path reads through `next()`, which rotates round-robin and
//! skips slots whose value is not known yet.

use super::nonce_errors::{NonceError, NonceResult};
use parking_lot::RwLock;
use solana_sdk::{
    hash::Hash,
    nonce::state::{State, Versions},
    pubkey::Pubkey,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug)]
struct NonceSlot {
    account: Pubkey,
    hash: RwLock<Option<Hash>>,
}

#[derive(Debug)]
pub struct NoncePool {
    slots: Vec<NonceSlot>,
    authority: Pubkey,
    cursor: AtomicUsize,
}

impl NoncePool {
    pub fn new(accounts: Vec<Pubkey>, authority: Pubkey) -> Self {
        Self {
            slots: accounts
                .into_iter()
                .map(|account| NonceSlot {
                    account,
                    hash: RwLock::new(None),
                })
                .collect(),
            authority,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn authority(&self) -> Pubkey {
        self.authority
    }

    pub fn accounts(&self) -> impl Iterator<Item = Pubkey> + '_ {
        self.slots.iter().map(|s| s.account)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots with a known nonce value
    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|s| s.hash.read().is_some()).count()
    }

    /// Next `(nonce_account, nonce_hash)` in rotation, `None` when no slot is ready
    pub fn next(&self) -> Option<(Pubkey, Hash)> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..n).find_map(|offset| {
            let slot = &self.slots[(start + offset) % n];
            let hash = (*slot.hash.read())?;
            Some((slot.account, hash))
        })
    }

    /// Record a fresh nonce value. Returns `false` for accounts outside the pool.
    pub fn update(&self, account: &Pubkey, hash: Hash) -> bool {
        let Some(slot) = self.slots.iter().find(|s| &s.account == account) else {
            return false;
        };
        let mut current = slot.hash.write();
        if current.as_ref() != Some(&hash) {
            debug!(nonce_account = %account, nonce = %hash, "Nonce updated");
            *current = Some(hash);
        }
        true
    }

    /// Decode raw account data and record its nonce value
    pub fn update_from_data(&self, account: &Pubkey, data: &[u8]) -> NonceResult<Hash> {
        let hash = decode_nonce_hash(account, data)?;
        self.update(account, hash);
        Ok(hash)
    }

    /// Forget a slot's value, e.g. after it was consumed by a landed transaction
    pub fn invalidate(&self, account: &Pubkey) {
        if let Some(slot) = self.slots.iter().find(|s| &s.account == account) {
            *slot.hash.write() = None;
        }
    }
}

/// Nonce value stored in a durable nonce account's data
pub fn decode_nonce_hash(account: &Pubkey, data: &[u8]) -> NonceResult<Hash> {
    let versions: Versions = bincode::deserialize(data)
        .map_err(|e| NonceError::InvalidNonceAccount(e.to_string()))?;
    match versions.state() {
        State::Initialized(data) => Ok(data.blockhash()),
        State::Uninitialized => Err(NonceError::Uninitialized(*account)),
    }
}
