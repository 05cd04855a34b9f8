//! Probabilistic signature deduper
//!
//! A bloom filter over `AtomicU64` words shared by every ingest worker. Bit
//! positions come from double hashing over a SHA-256 digest of the key.
//! Check-and-set for one key runs under a striped lock chosen by that key's
//! digest, so redundant feeds racing on the same signature see exactly one
//! fresh insert; different keys rarely share a stripe. Once `capacity` keys have been inserted the filter is
//! cleared, which bounds the false-positive rate at the cost of forgetting
//! keys older than one generation.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct SignatureDeduper {
    words: Vec<AtomicU64>,
    bits: u64,
    hashes: u32,
    capacity: usize,
    inserted: AtomicUsize,
    stripes: Box<[Mutex<()>]>,
}

const STRIPES: usize = 64;

impl SignatureDeduper {
    /// Size the filter for `capacity` keys at false-positive rate `fpr`
    pub fn new(capacity: usize, fpr: f64) -> Self {
        let capacity = capacity.max(1);
        let fpr = if fpr.is_finite() {
            fpr.clamp(1e-9, 0.5)
        } else {
            0.001
        };
        let ln2 = std::f64::consts::LN_2;
        let bits = (-(capacity as f64) * fpr.ln() / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hashes = ((bits as f64 / capacity as f64) * ln2).round().clamp(1.0, 32.0) as u32;
        let word_count = bits.div_ceil(64) as usize;
        Self {
            words: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            bits: word_count as u64 * 64,
            hashes,
            capacity,
            inserted: AtomicUsize::new(0),
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn bit_len(&self) -> u64 {
        self.bits
    }

    pub fn hash_count(&self) -> u32 {
        self.hashes
    }

    fn hash_pair(key: &[u8]) -> (u64, u64) {
        let digest = Sha256::digest(key);
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a.copy_from_slice(&digest[..8]);
        b.copy_from_slice(&digest[8..16]);
        (u64::from_le_bytes(a), u64::from_le_bytes(b) | 1)
    }

    fn positions(&self, (h1, h2): (u64, u64)) -> impl Iterator<Item = u64> + '_ {
        (0..self.hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.bits)
    }

    /// Record `key`; true when it was not (probably) seen before
    pub fn check_and_insert(&self, key: &[u8]) -> bool {
        if self.inserted.load(Ordering::Relaxed) >= self.capacity {
            self.clear();
        }
        let hashes = Self::hash_pair(key);
        let _stripe = self.stripes[(hashes.0 % STRIPES as u64) as usize].lock();
        let mut fresh = false;
        for bit in self.positions(hashes) {
            let mask = 1u64 << (bit % 64);
            let prev = self.words[(bit / 64) as usize].fetch_or(mask, Ordering::AcqRel);
            if prev & mask == 0 {
                fresh = true;
            }
        }
        if fresh {
            self.inserted.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.positions(Self::hash_pair(key)).all(|bit| {
            self.words[(bit / 64) as usize].load(Ordering::Acquire) & (1u64 << (bit % 64)) != 0
        })
    }

    pub fn clear(&self) {
        for word in &self.words {
            word.store(0, Ordering::Relaxed);
        }
        self.inserted.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
