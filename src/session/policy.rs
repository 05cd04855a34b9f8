//! Sell retry policy
//!
//! Every failed attempt counts toward the ceiling. Past it the session makes
//! one attempt through the aggregator at the fallback slippage.

use crate::config::PolicyConfig;
use crate::rpc_manager::ProgramErrorKind;
use std::time::Duration;

const MAX_SLIPPAGE_PCT: f64 = 100.0;
const SLIPPAGE_STEP: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellAttempt {
    pub slippage_pct: f64,
    pub failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NextStep {
    /// The token account is gone; count the position as sold
    TreatAsClosed,
    Retry {
        /// Refresh the remaining balance before the next attempt
        requery: bool,
        backoff: Duration,
    },
    /// Ceiling reached: one aggregator attempt
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellPolicy {
    ceiling: u32,
    initial_slippage_pct: f64,
    fallback_slippage_pct: f64,
}

impl SellPolicy {
    pub fn new(ceiling: u32, initial_slippage_pct: f64, fallback_slippage_pct: f64) -> Self {
        Self {
            ceiling,
            initial_slippage_pct,
            fallback_slippage_pct,
        }
    }

    pub fn from_config(policy: &PolicyConfig) -> Self {
        Self::new(
            policy.sell_retry_ceiling,
            policy.initial_sell_slippage,
            policy.fallback_slippage,
        )
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn first_attempt(&self) -> SellAttempt {
        SellAttempt {
            slippage_pct: self.initial_slippage_pct,
            failures: 0,
        }
    }

    pub fn on_failure(&self, attempt: &mut SellAttempt, kind: ProgramErrorKind) -> NextStep {
        if kind == ProgramErrorKind::AccountClosed {
            return NextStep::TreatAsClosed;
        }
        attempt.failures += 1;
        if attempt.failures >= self.ceiling {
            return NextStep::Fallback;
        }
        match kind {
            ProgramErrorKind::SlippageExceeded => {
                attempt.slippage_pct = (attempt.slippage_pct * SLIPPAGE_STEP).min(MAX_SLIPPAGE_PCT);
                NextStep::Retry {
                    requery: false,
                    backoff: kind.backoff(),
                }
            }
            ProgramErrorKind::RateLimited => NextStep::Retry {
                requery: false,
                backoff: kind.backoff(),
            },
            ProgramErrorKind::InsufficientBalance | ProgramErrorKind::Transient => NextStep::Retry {
                requery: true,
                backoff: kind.backoff(),
            },
            ProgramErrorKind::AccountClosed => NextStep::TreatAsClosed,
        }
    }

    /// Aggregator slippage in basis points
    pub fn fallback_bps(&self) -> u16 {
        pct_to_bps(self.fallback_slippage_pct)
    }
}

/// Percent to basis points, clamped to 100%
pub fn pct_to_bps(pct: f64) -> u16 {
    if !(pct > 0.0) {
        return 0;
    }
    (pct * 100.0).round().min(10_000.0) as u16
}
