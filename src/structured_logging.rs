//! Correlated session logging
//!
//! Every line a session emits carries the same `session_id` and `token`, so
//! one position can be followed end to end in the JSON log output.

use crate::types::WatchClass;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::time::Duration;
use uuid::Uuid;

/// Structured logger for one trading session
#[derive(Debug, Clone)]
pub struct SessionLogger {
    session_id: Uuid,
    token: Pubkey,
    class: WatchClass,
}

impl SessionLogger {
    pub fn new(token: Pubkey, class: WatchClass) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            token,
            class,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn trigger_fired(&self, trigger: &Signature, hold: Duration, delay: Duration) {
        tracing::info!(
            session_id = %self.session_id,
            token = %self.token,
            class = %self.class,
            trigger = %trigger,
            hold_ms = hold.as_millis() as u64,
            delay_ms = delay.as_millis() as u64,
            "Session opened"
        );
    }

    pub fn buy_attempt(&self, route: &str, amount: u64, slippage_pct: f64) {
        tracing::info!(
            session_id = %self.session_id,
            token = %self.token,
            route = %route,
            amount = amount,
            slippage_pct = slippage_pct,
            "Attempting buy"
        );
    }

    pub fn buy_success(&self, sig: &Signature, channel: &str, tokens: u64, cost_lamports: u64, slot: u64) {
        tracing::info!(
            session_id = %self.session_id,
            token = %self.token,
            signature = %sig,
            channel = %channel,
            tokens = tokens,
            cost_lamports = cost_lamports,
            slot = slot,
            "Buy confirmed"
        );
    }

    pub fn buy_failure(&self, error: &dyn std::fmt::Display) {
        tracing::warn!(
            session_id = %self.session_id,
            token = %self.token,
            error = %error,
            "Buy failed, session aborted"
        );
    }

    pub fn sell_attempt(&self, reason: &str, amount: u64, remaining: u64, slippage_pct: f64, attempt: u32) {
        tracing::info!(
            session_id = %self.session_id,
            token = %self.token,
            reason = %reason,
            amount = amount,
            remaining = remaining,
            slippage_pct = slippage_pct,
            attempt = attempt,
            "Attempting sell"
        );
    }

    pub fn sell_success(&self, sig: &Signature, channel: &str, sold: u64, received_lamports: i64, remaining: u64) {
        tracing::info!(
            session_id = %self.session_id,
            token = %self.token,
            signature = %sig,
            channel = %channel,
            sold = sold,
            received_lamports = received_lamports,
            remaining = remaining,
            "Sell confirmed"
        );
    }

    pub fn sell_failure(&self, error: &dyn std::fmt::Display, attempt: u32) {
        tracing::warn!(
            session_id = %self.session_id,
            token = %self.token,
            error = %error,
            attempt = attempt,
            "Sell attempt failed"
        );
    }

    pub fn session_closed(&self, cost_lamports: u64, profit_lamports: i64) {
        tracing::info!(
            session_id = %self.session_id,
            token = %self.token,
            class = %self.class,
            cost_lamports = cost_lamports,
            profit_lamports = profit_lamports,
            "Session closed"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            session_id = %self.session_id,
            token = %self.token,
            message = %message,
            "Warning"
        );
    }

    pub fn error(&self, message: &str) {
        tracing::error!(
            session_id = %self.session_id,
            token = %self.token,
            message = %message,
            "Error"
        );
    }
}
