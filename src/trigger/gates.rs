//! Pre-trade gates
//!
//! Every gate is a pure check over the event and a few numbers. A gate
//! either passes or names the reason it rejected, which ends up as the
//! `reason` label on `triggers_rejected_total`.

use crate::tx_builder::raydium_launchpad;
use crate::types::{SwapEvent, Venue, USDC_MINT, WSOL_MINT};
use std::fmt;
use std::time::Duration;

/// Dev buy band for mint triggers, lamports
pub const MINT_DEV_BUY_MIN: u64 = 1_000_000_000;
pub const MINT_DEV_BUY_MAX: u64 = 3_000_000_000;

/// Dev buys above this get wider slippage and a long hold
pub const BIG_DEV_BUY: u64 = 10_000_000_000;
pub const BIG_DEV_SLIPPAGE_PCT: f64 = 20.0;
pub const BIG_DEV_HOLD: Duration = Duration::from_secs(60);

/// Hold when our buy is at least the dev's
pub const MATCHED_DEV_HOLD: Duration = Duration::from_millis(400);

/// Hold when our buy landed more than one slot behind the trigger
pub const LAGGED_HOLD: Duration = Duration::from_millis(1);

/// Smallest smart-wallet trade worth following
pub const SMART_MIN_SOL: u64 = 1_000_000_000;
pub const SMART_MIN_USDC: u64 = 100_000_000;

/// Fixed buy when the smart wallet paid in USDC, base units
pub const SMART_USDC_BUY: u64 = 50_000_000;

/// Smart-wallet buys follow almost at the quote
pub const SMART_SLIPPAGE_PCT: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The class is switched off for this hour
    Disabled,
    /// Wallet balance under the reserve floor
    BalanceFloor,
    /// Not a quote-in, token-out trade
    Direction,
    /// Trade size outside the accepted band
    Size,
    /// Launchpad trade without a genuine create instruction
    NotCreate,
    /// Signer is not on the smart list
    NotTracked,
    /// No pool snapshot to trade against
    MissingPool,
    /// Token already has a session or was bought recently
    AlreadyTracked,
    /// Downstream could not take the opportunity
    Backpressure,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::BalanceFloor => "balance",
            Self::Direction => "direction",
            Self::Size => "size",
            Self::NotCreate => "not_create",
            Self::NotTracked => "not_tracked",
            Self::MissingPool => "missing_pool",
            Self::AlreadyTracked => "already_tracked",
            Self::Backpressure => "backpressure",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// An unknown balance (0) passes; a known one must reach the floor
pub fn check_balance(balance: u64, floor: u64) -> Result<(), Rejection> {
    if balance != 0 && balance < floor {
        return Err(Rejection::BalanceFloor);
    }
    Ok(())
}

/// SOL in, token out
pub fn check_sol_buy(event: &SwapEvent) -> Result<(), Rejection> {
    if event.input_mint != WSOL_MINT || event.output_mint == WSOL_MINT {
        return Err(Rejection::Direction);
    }
    Ok(())
}

/// SOL or USDC in, token out
pub fn check_quote_buy(event: &SwapEvent) -> Result<(), Rejection> {
    if !event.is_buy() {
        return Err(Rejection::Direction);
    }
    Ok(())
}

pub fn check_band(amount: u64, min: u64, max: u64) -> Result<(), Rejection> {
    if amount < min || amount > max {
        return Err(Rejection::Size);
    }
    Ok(())
}

/// Smart trades must be at least 1 SOL or 100 USDC
pub fn check_smart_size(event: &SwapEvent) -> Result<(), Rejection> {
    let min = if event.input_mint == USDC_MINT {
        SMART_MIN_USDC
    } else {
        SMART_MIN_SOL
    };
    if event.input_amount < min {
        return Err(Rejection::Size);
    }
    Ok(())
}

/// Launchpad events must carry the create instruction; other venues pass
pub fn check_create_instruction(event: &SwapEvent) -> Result<(), Rejection> {
    if event.venue() != Some(Venue::RaydiumLaunchpad) {
        return Ok(());
    }
    match event.create_instruction {
        Some(info)
            if info.discriminator == raydium_launchpad::CREATE_DISCRIMINATOR
                && info.account_count >= raydium_launchpad::CREATE_MIN_ACCOUNTS =>
        {
            Ok(())
        }
        _ => Err(Rejection::NotCreate),
    }
}
