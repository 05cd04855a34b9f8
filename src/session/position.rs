//! Own position and the counterparty we follow
//!
//! Both are written only by the owning session loop but read from the rule
//! evaluation and the ladder, so every field is an atomic scalar. Prices are
//! display-only `f64` stored as bits.

use crate::types::{AtomicF64, TOKEN_DECIMALS_SCALE};
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// SOL per whole token, same unit as the pool display price
pub fn price_of(lamports: u64, tokens: u64) -> f64 {
    if tokens == 0 {
        return 0.0;
    }
    (lamports as f64 / LAMPORTS_PER_SOL as f64) / (tokens as f64 / TOKEN_DECIMALS_SCALE)
}

#[derive(Debug, Default)]
pub struct Position {
    buy_price: AtomicF64,
    last_sell_price: AtomicF64,
    bought: AtomicU64,
    remaining: AtomicU64,
    /// Lamports paid for the buy, fees included
    cost: AtomicU64,
    /// Net lamports received across all sells
    proceeds: AtomicI64,
    ready: AtomicBool,
}

impl Position {
    pub fn record_buy(&self, tokens: u64, lamports: u64, price: f64) {
        self.bought.store(tokens, Ordering::Release);
        self.remaining.store(tokens, Ordering::Release);
        self.cost.store(lamports, Ordering::Release);
        self.buy_price.store(price);
    }

    /// Returns the remaining amount after the sell
    pub fn record_sell(&self, tokens: u64, lamports: i64, price: f64) -> u64 {
        self.proceeds.fetch_add(lamports, Ordering::AcqRel);
        if price > 0.0 {
            self.last_sell_price.store(price);
        }
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| Some(r.saturating_sub(tokens)))
            .unwrap_or(0);
        previous.saturating_sub(tokens)
    }

    /// Overwrite with an authoritative balance
    pub fn set_remaining(&self, tokens: u64) {
        self.remaining.store(tokens, Ordering::Release);
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn bought(&self) -> u64 {
        self.bought.load(Ordering::Acquire)
    }

    pub fn cost_lamports(&self) -> u64 {
        self.cost.load(Ordering::Acquire)
    }

    pub fn buy_price(&self) -> f64 {
        self.buy_price.load()
    }

    pub fn last_sell_price(&self) -> f64 {
        self.last_sell_price.load()
    }

    /// Sell proceeds minus cost
    pub fn profit_lamports(&self) -> i64 {
        self.proceeds.load(Ordering::Acquire) - self.cost_lamports() as i64
    }

    /// Observations may emit sell commands
    pub fn arm(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Latch after a liquidating command so it is emitted once
    pub fn disarm(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct TrackedCounterparty {
    wallets: Vec<Pubkey>,
    initial: u64,
    remaining: AtomicU64,
    signals: AtomicU32,
}

impl TrackedCounterparty {
    pub fn new(wallets: Vec<Pubkey>, initial: u64) -> Self {
        Self {
            wallets,
            initial,
            remaining: AtomicU64::new(initial),
            signals: AtomicU32::new(0),
        }
    }

    pub fn wallets(&self) -> &[Pubkey] {
        &self.wallets
    }

    pub fn first(&self) -> Option<&Pubkey> {
        self.wallets.first()
    }

    pub fn is_tracked(&self, wallet: &Pubkey) -> bool {
        self.wallets.contains(wallet)
    }

    pub fn initial(&self) -> u64 {
        self.initial
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Decrement by an observed sell, returns what is left
    pub fn record_sell(&self, tokens: u64) -> u64 {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| Some(r.saturating_sub(tokens)))
            .unwrap_or(0);
        previous.saturating_sub(tokens)
    }

    /// Count a partial exit, returns the new count
    pub fn bump_signal(&self) -> u32 {
        self.signals.fetch_add(1, Ordering::AcqRel) + 1
    }
}
