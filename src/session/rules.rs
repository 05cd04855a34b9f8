//! Observation rules
//!
//! Turns a trade on the session's token into reactions: sell commands,
//! hold-timer adjustments and follow-buy notices. The rules read the
//! position and mutate only the counterparty tracker; the session loop
//! applies whatever comes back in order.

use super::position::{Position, TrackedCounterparty};
use crate::config::PolicyConfig;
use crate::hot_config::HotSnapshot;
use crate::types::{SwapEvent, WatchClass, WSOL_MINT};
use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use solana_sdk::pubkey::Pubkey;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liquidate everything
    Sell,
    /// Sell a third of what remains
    SellSome,
    /// Sell just enough to recover the cost basis at the current price
    BreakEven,
    /// Safety liquidation of everything
    Stop,
    /// Mirror a partial exit of the tracked wallet
    Mirror { sold: u64, their_remaining: u64 },
}

impl Command {
    /// Liquidating commands end the command listener
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sell | Self::Stop)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sell => "sell",
            Self::SellSome => "sell-some",
            Self::BreakEven => "break-even",
            Self::Stop => "stop",
            Self::Mirror { .. } => "mirror",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reaction {
    Command(Command),
    /// Signed hold-step adjustment in milliseconds
    Extend(i64),
    /// Somebody else bought with SOL
    FollowBuy { signer: Pubkey, at: DateTime<Utc> },
}

pub struct RuleInput<'a> {
    pub class: WatchClass,
    pub own: &'a Pubkey,
    pub position: &'a Position,
    pub tracked: &'a TrackedCounterparty,
    pub policy: &'a PolicyConfig,
    pub hot: &'a HotSnapshot,
    /// Current token price, display units
    pub price: f64,
}

pub type Reactions = SmallVec<[Reaction; 4]>;

pub fn observe(input: &RuleInput<'_>, event: &SwapEvent) -> Reactions {
    let mut out = Reactions::new();
    let Some(signer) = event.primary_signer() else {
        return out;
    };
    // own fills are accounted from confirmations
    if signer == input.own {
        return out;
    }
    if event.input_mint == WSOL_MINT {
        out.push(Reaction::FollowBuy {
            signer: *signer,
            at: event.timestamp,
        });
    }
    if !input.position.is_ready() {
        return out;
    }

    let policy = input.policy;
    let price = input.price;
    let last_sell = input.position.last_sell_price();
    if last_sell > 0.0 && price < last_sell * policy.stop_loss_ratio {
        out.push(Reaction::Command(Command::Sell));
        return out;
    }

    let buy_price = input.position.buy_price();
    let above_gain = buy_price > 0.0 && price > buy_price * policy.break_even_gain;
    let is_sell = event.output_mint == WSOL_MINT;

    if is_sell && input.tracked.is_tracked(signer) {
        if above_gain {
            out.push(Reaction::Command(Command::BreakEven));
            return out;
        }
        let sold = event.input_amount;
        let before = input.tracked.remaining();
        let after = input.tracked.record_sell(sold);
        if before <= sold {
            out.push(Reaction::Command(Command::Sell));
            return out;
        }
        if input.tracked.bump_signal() >= policy.counter_signal_limit {
            out.push(Reaction::Command(Command::Sell));
            return out;
        }
        out.push(Reaction::Command(Command::Mirror {
            sold,
            their_remaining: after,
        }));
    }

    if is_sell && above_gain {
        out.push(Reaction::Command(Command::BreakEven));
        return out;
    }

    let bought = input.position.bought();
    if bought > 0 {
        if !is_sell && event.output_amount > bought {
            let ratio = event.output_amount as f64 / bought as f64;
            out.push(Reaction::Extend((policy.hold_extend_ms * (1.0 + ratio)).round() as i64));
        }
        if is_sell {
            let ratio = event.input_amount as f64 / bought as f64;
            out.push(Reaction::Extend(-(policy.hold_shrink_ms * ratio).round() as i64));
        }
    }

    if input.class == WatchClass::Mint {
        if input.hot.is_robot(signer) {
            out.push(Reaction::Command(Command::Stop));
            return out;
        }
        // the first outside buy is the exit for a launch snipe
        if !is_sell {
            let command = if above_gain { Command::BreakEven } else { Command::Sell };
            out.push(Reaction::Command(command));
        }
    }
    out
}
