//! Strategy triggers
//!
//! Three watch classes decide whether a swap opens a position:
//!
//! - **mint**: a creation authority of a launch venue took part, and the dev
//!   bought within the accepted band
//! - **smart**: an allow-listed wallet bought with SOL or USDC
//! - **scm**: the fixed mirror address bought with SOL; we answer with an
//!   aggregator sell of the same size instead of opening a session
//!
//! `WatchSet` is the ingest-side filter. `Trigger` runs the gates and turns
//! an accepted event into a `TriggerAction`. One router task per class
//! drains its channel, so a slow class never holds up another.

pub mod gates;
pub mod sizing;

pub use gates::Rejection;
pub use sizing::{dynamic_buy_amount, dynamic_slippage, hold_duration, DynamicSlippageInput, HoldCurve};

use crate::hot_config::{HotConfig, HotSnapshot, StrategyParams};
use crate::metrics::metrics;
use crate::sniffer::{BuyCache, PoolRegistry, WatchFilter};
use crate::tx_builder::{pump_fun, raydium_launchpad};
use crate::types::{PoolData, SwapEvent, WatchClass, USDC_MINT, WSOL_MINT};
use crate::wallet::BalanceWatcher;
use chrono::Timelike;
use dashmap::DashMap;
use smallvec::SmallVec;
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey, pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Address mirrored by the scm class
pub const SCM_ADDRESS: Pubkey = pubkey!("2x4Mp5dLefbx8V684sQDxNxUwgp3bqoibAgacLqs5z19");

/// Creation authorities that mark a mint event
pub const MINT_AUTHORITIES: [Pubkey; 2] = [pump_fun::MINT_AUTHORITY, raydium_launchpad::MINT_AUTHORITY];

const ROBOT_WINDOW: Duration = Duration::from_secs(60);

/// What a session should buy with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuyPlan {
    /// SOL amount before the position multiplier
    Sol(f64),
    /// Fixed USDC amount in base units, routed through the aggregator
    Usdc(u64),
}

/// An accepted trigger, everything a session needs to start
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub class: WatchClass,
    pub token: Pubkey,
    pub trigger_signature: Signature,
    pub trigger_slot: u64,
    pub pool: PoolData,
    /// Wallets whose exits we mirror; the first one is the trigger signer
    pub tracked: Vec<Pubkey>,
    /// What the tracked wallet paid with
    pub tracked_input_mint: Pubkey,
    /// Tokens the tracked wallet received
    pub tracked_initial: u64,
    pub buy: BuyPlan,
    pub slippage_pct: f64,
    pub hold: Duration,
    pub delay: Duration,
    /// Collapse the hold when our buy lands more than one slot late
    pub collapse_hold_on_lag: bool,
}

/// Aggregator sell that mirrors an scm buy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorOrder {
    pub token: Pubkey,
    pub amount: u64,
    pub trigger_signature: Signature,
}

#[derive(Debug, Clone)]
pub enum TriggerAction {
    Open(Box<Opportunity>),
    Mirror(MirrorOrder),
}

impl TriggerAction {
    pub fn token(&self) -> Pubkey {
        match self {
            Self::Open(opportunity) => opportunity.token,
            Self::Mirror(order) => order.token,
        }
    }
}

/// Ingest-side classifier over the three watch classes
pub struct WatchSet {
    hot: Arc<HotConfig>,
    scm_enabled: bool,
}

impl WatchSet {
    pub fn new(hot: Arc<HotConfig>, scm_enabled: bool) -> Self {
        Self { hot, scm_enabled }
    }
}

fn touches(event: &SwapEvent, key: &Pubkey) -> bool {
    event.is_signed_by(key) || event.matched_accounts.contains(key)
}

impl WatchFilter for WatchSet {
    fn classify(&self, event: &SwapEvent) -> SmallVec<[WatchClass; 3]> {
        let mut classes = SmallVec::new();
        if MINT_AUTHORITIES.iter().any(|a| touches(event, a)) {
            classes.push(WatchClass::Mint);
        }
        let snapshot = self.hot.snapshot();
        if event.signers.iter().any(|s| snapshot.smart.contains_key(s)) {
            classes.push(WatchClass::Smart);
        }
        if self.scm_enabled && touches(event, &SCM_ADDRESS) {
            classes.push(WatchClass::Scm);
        }
        classes
    }
}

pub struct Trigger {
    hot: Arc<HotConfig>,
    pools: Arc<PoolRegistry>,
    buy_cache: Arc<BuyCache>,
    balance: Arc<BalanceWatcher>,
    balance_floor: u64,
    robots_seen: DashMap<Pubkey, Instant>,
}

impl Trigger {
    pub fn new(
        hot: Arc<HotConfig>,
        pools: Arc<PoolRegistry>,
        buy_cache: Arc<BuyCache>,
        balance: Arc<BalanceWatcher>,
        balance_floor: u64,
    ) -> Self {
        Self {
            hot,
            pools,
            buy_cache,
            balance,
            balance_floor,
            robots_seen: DashMap::new(),
        }
    }

    /// Run every gate for `class`. A pass reserves the token in the buy cache.
    pub fn evaluate(&self, class: WatchClass, event: &SwapEvent) -> Result<TriggerAction, Rejection> {
        let snapshot = self.hot.snapshot();
        self.note_robots(&snapshot, event);
        let params = snapshot.strategy.params_for_hour(chrono::Local::now().hour());

        match class {
            WatchClass::Mint => self.evaluate_mint(&params, event),
            WatchClass::Smart => self.evaluate_smart(&snapshot, &params, event),
            WatchClass::Scm => evaluate_scm(event),
        }
    }

    fn evaluate_mint(&self, params: &StrategyParams, event: &SwapEvent) -> Result<TriggerAction, Rejection> {
        if !params.mint_start {
            return Err(Rejection::Disabled);
        }
        gates::check_balance(self.balance.lamports(), self.balance_floor)?;
        gates::check_create_instruction(event)?;
        gates::check_sol_buy(event)?;
        let dev_buy = event.input_amount;
        gates::check_band(dev_buy, gates::MINT_DEV_BUY_MIN, gates::MINT_DEV_BUY_MAX)?;
        let pool = self.pool_for(event)?;
        let signer = *event.primary_signer().ok_or(Rejection::Direction)?;

        let dev_sol = dev_buy as f64 / LAMPORTS_PER_SOL as f64;
        let mut hold = hold_duration(dev_sol, params.min_hold(), params.max_hold(), HoldCurve::Negative);
        let buy_sol = dynamic_buy_amount(dev_sol, params.min_buy_amount, params.max_buy_amount);
        let mut slippage_pct = self.buy_slippage(params, &pool);

        if dev_buy > gates::BIG_DEV_BUY {
            slippage_pct = gates::BIG_DEV_SLIPPAGE_PCT;
            hold = gates::BIG_DEV_HOLD;
        }
        if buy_sol >= dev_sol {
            hold = gates::MATCHED_DEV_HOLD;
        }

        self.reserve(event.output_mint)?;
        Ok(TriggerAction::Open(Box::new(Opportunity {
            class: WatchClass::Mint,
            token: event.output_mint,
            trigger_signature: event.signature,
            trigger_slot: event.slot,
            pool,
            tracked: vec![signer],
            tracked_input_mint: WSOL_MINT,
            tracked_initial: event.output_amount,
            buy: BuyPlan::Sol(buy_sol),
            slippage_pct,
            hold,
            delay: params.delay(),
            collapse_hold_on_lag: true,
        })))
    }

    fn evaluate_smart(
        &self,
        snapshot: &HotSnapshot,
        params: &StrategyParams,
        event: &SwapEvent,
    ) -> Result<TriggerAction, Rejection> {
        if !params.smart_start {
            return Err(Rejection::Disabled);
        }
        gates::check_balance(self.balance.lamports(), self.balance_floor)?;
        let signer = *event.primary_signer().ok_or(Rejection::NotTracked)?;
        let label = snapshot.smart_label(&signer).ok_or(Rejection::NotTracked)?;
        gates::check_quote_buy(event)?;
        gates::check_smart_size(event)?;
        let pool = self.pool_for(event)?;

        let their_sol = event.input_amount as f64 / LAMPORTS_PER_SOL as f64;
        let hold = hold_duration(their_sol, params.min_hold(), params.max_hold(), HoldCurve::Negative);
        let buy = if event.input_mint == USDC_MINT {
            BuyPlan::Usdc(gates::SMART_USDC_BUY)
        } else {
            BuyPlan::Sol(dynamic_buy_amount(their_sol, params.min_buy_amount, params.max_buy_amount))
        };

        self.reserve(event.output_mint)?;
        info!(token = %event.output_mint, wallet = %signer, label, "Smart wallet buy");
        Ok(TriggerAction::Open(Box::new(Opportunity {
            class: WatchClass::Smart,
            token: event.output_mint,
            trigger_signature: event.signature,
            trigger_slot: event.slot,
            pool,
            tracked: tracked_wallets(signer, snapshot.smart.keys().copied()),
            tracked_input_mint: event.input_mint,
            tracked_initial: event.output_amount,
            buy,
            slippage_pct: gates::SMART_SLIPPAGE_PCT,
            hold,
            delay: Duration::ZERO,
            collapse_hold_on_lag: false,
        })))
    }

    fn pool_for(&self, event: &SwapEvent) -> Result<PoolData, Rejection> {
        event
            .pool
            .or_else(|| self.pools.get(&event.token_mint()).map(|state| state.pool()))
            .ok_or(Rejection::MissingPool)
    }

    fn reserve(&self, token: Pubkey) -> Result<(), Rejection> {
        if self.buy_cache.insert_if_absent(token) {
            Ok(())
        } else {
            Err(Rejection::AlreadyTracked)
        }
    }

    /// Give back a reservation the dispatcher could not use
    pub fn release(&self, token: &Pubkey) {
        self.buy_cache.remove(token);
    }

    /// Configured buy slippage, or the dynamic estimate when unset
    fn buy_slippage(&self, params: &StrategyParams, pool: &PoolData) -> f64 {
        if params.buy_slippage > 0.0 {
            return params.buy_slippage;
        }
        let input = DynamicSlippageInput {
            bot_count: self.active_robots() as u32,
            liquidity_sol: liquidity_sol(pool),
            creator_rug_rate: 0.5,
            hour: chrono::Local::now().hour(),
            trend_score: 0.5,
        };
        dynamic_slippage(&input) * 100.0
    }

    fn note_robots(&self, snapshot: &HotSnapshot, event: &SwapEvent) {
        let now = Instant::now();
        for signer in event.signers.iter().filter(|s| snapshot.is_robot(s)) {
            self.robots_seen.insert(*signer, now);
        }
    }

    /// Distinct robot wallets seen within the last minute
    pub fn active_robots(&self) -> usize {
        self.robots_seen.retain(|_, seen| seen.elapsed() < ROBOT_WINDOW);
        self.robots_seen.len()
    }

    /// Drain one class channel until cancelled, forwarding accepted actions
    pub async fn run_class(
        self: Arc<Self>,
        class: WatchClass,
        mut rx: mpsc::Receiver<Arc<SwapEvent>>,
        sink: mpsc::Sender<TriggerAction>,
        cancel: CancellationToken,
    ) {
        info!(%class, "Trigger router started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.route(class, &event, &sink);
        }
        info!(%class, "Trigger router stopped");
    }

    fn route(&self, class: WatchClass, event: &SwapEvent, sink: &mpsc::Sender<TriggerAction>) {
        let label = class.to_string();
        match self.evaluate(class, event) {
            Ok(action) => {
                let token = action.token();
                match sink.try_send(action) {
                    Ok(()) => {
                        metrics().triggers_fired.with_label_values(&[&label]).inc();
                        info!(%class, token = %token, sig = %event.signature, "Trigger fired");
                    }
                    Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                        self.release(&token);
                        metrics().record_rejection(&label, Rejection::Backpressure.reason());
                    }
                }
            }
            Err(rejection) => {
                metrics().record_rejection(&label, rejection.reason());
                debug!(%class, sig = %event.signature, reason = %rejection, "Trigger rejected");
            }
        }
    }
}

fn evaluate_scm(event: &SwapEvent) -> Result<TriggerAction, Rejection> {
    gates::check_sol_buy(event)?;
    if event.output_amount == 0 {
        return Err(Rejection::Size);
    }
    Ok(TriggerAction::Mirror(MirrorOrder {
        token: event.output_mint,
        amount: event.output_amount,
        trigger_signature: event.signature,
    }))
}

/// Quote-side depth of the pool in SOL, zero when the venue does not expose it
fn liquidity_sol(pool: &PoolData) -> f64 {
    let lamports = match pool {
        PoolData::PumpFun(p) => p.real_sol_reserves,
        PoolData::PumpAmm(p) => p.quote_reserves,
        PoolData::RaydiumLaunchpad(p) => p.real_quote,
        PoolData::MeteoraDbc(_) => 0,
    };
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Signer first, then the rest of the smart list
fn tracked_wallets(first: Pubkey, smart: impl Iterator<Item = Pubkey>) -> Vec<Pubkey> {
    std::iter::once(first).chain(smart.filter(|k| *k != first)).collect()
}
