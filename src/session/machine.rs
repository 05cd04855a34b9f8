//! Per-token trading session
//!
//! A session owns one position from the buy to the final balance check:
//!
//! ```text
//! Created -> AwaitingBuyCompletion -> Holding -> StagedSelling -> Closed
//!        \-> Aborted             \-> Aborted    \-> Closed
//! ```
//!
//! While holding, a single loop multiplexes trades on the token, commands
//! queued through the registry, hold-timer tranches, the take-profit ladder,
//! the balance poll and the follow and close deadlines. Sells are serialized by that loop, so at most one order
//! per token is ever in flight.

use super::errors::SessionError;
use super::executor::{Fill, Route, TradeExecutor};
use super::guard::{BuyGuard, BuySlot};
use super::policy::{pct_to_bps, NextStep, SellPolicy};
use super::position::{price_of, Position, TrackedCounterparty};
use super::registry::{SessionHandle, SessionRegistry};
use super::rules::{self, Command, Reaction, RuleInput};
use super::state::{SessionState, StateCell};
use crate::config::{PolicyConfig, RelayConfig};
use crate::hold_timer::{HoldTimers, TrancheRequest, STEPS};
use crate::hot_config::HotConfig;
use crate::metrics::metrics;
use crate::profit::{ClosedPosition, PositionSizing, ProfitBus};
use crate::quote;
use crate::sniffer::{BuyCache, PoolRegistry};
use crate::structured_logging::SessionLogger;
use crate::trigger::{gates, BuyPlan, Opportunity};
use crate::tx_builder::TxContext;
use crate::types::{PoolData, SwapEvent, WatchClass, TOKEN_DECIMALS_SCALE, USDC_MINT, WSOL_MINT};
use chrono::{DateTime, Local, Utc};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Tips and fees attached to each kind of order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TipSchedule {
    pub buy: u64,
    pub sell: u64,
    pub aggregator: u64,
    /// Compute unit price, micro-lamports
    pub priority_fee: u64,
}

impl TipSchedule {
    pub fn from_config(relay: &RelayConfig) -> Self {
        Self {
            buy: relay.buy_tip_cap,
            sell: relay.sell_tip,
            aggregator: relay.aggregator_tip,
            priority_fee: relay.priority_fee,
        }
    }
}

/// Everything a session shares with the rest of the engine
pub struct SessionDeps {
    pub executor: Arc<dyn TradeExecutor>,
    pub registry: Arc<SessionRegistry>,
    pub guard: Arc<BuyGuard>,
    pub timers: Arc<HoldTimers>,
    pub hot: Arc<HotConfig>,
    pub pools: Arc<PoolRegistry>,
    pub buy_cache: Arc<BuyCache>,
    pub sizing: Arc<PositionSizing>,
    pub profits: ProfitBus,
    pub policy: PolicyConfig,
    pub tips: TipSchedule,
    pub min_buy_sol: f64,
    /// Per-session inbox capacity
    pub event_buffer: usize,
}

/// Register a session for `opportunity` and spawn it.
///
/// Fails with [`SessionError::AlreadyLive`] when the token already has one.
pub fn open(
    deps: &Arc<SessionDeps>,
    opportunity: Opportunity,
    parent: &CancellationToken,
) -> Result<JoinHandle<Result<(), SessionError>>, SessionError> {
    let (session, inbox) = prepare(deps, opportunity, parent)?;
    Ok(tokio::spawn(session.run(inbox)))
}

/// Like [`open`], with the task counted by `tracker` so shutdown can wait for it
pub fn open_tracked(
    deps: &Arc<SessionDeps>,
    opportunity: Opportunity,
    parent: &CancellationToken,
    tracker: &TaskTracker,
) -> Result<JoinHandle<Result<(), SessionError>>, SessionError> {
    let (session, inbox) = prepare(deps, opportunity, parent)?;
    Ok(tracker.spawn(session.run(inbox)))
}

/// Capacity of a session's command queue
const COMMAND_BUFFER: usize = 8;

/// Receiving ends of a session's event and command channels
struct Inbox {
    events: mpsc::Receiver<Arc<SwapEvent>>,
    commands: mpsc::Receiver<Command>,
}

fn prepare(
    deps: &Arc<SessionDeps>,
    opportunity: Opportunity,
    parent: &CancellationToken,
) -> Result<(Session, Inbox), SessionError> {
    let token = opportunity.token;
    let cancel = parent.child_token();
    let (events_tx, events_rx) = mpsc::channel(deps.event_buffer.max(1));
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let log = SessionLogger::new(token, opportunity.class);

    deps.registry.register(
        token,
        SessionHandle {
            id: log.session_id(),
            events: events_tx,
            commands: commands_tx,
            cancel: cancel.clone(),
        },
    )?;
    metrics().sessions_opened.inc();
    log.trigger_fired(&opportunity.trigger_signature, opportunity.hold, opportunity.delay);

    let inbox = Inbox {
        events: events_rx,
        commands: commands_rx,
    };
    Ok((Session::new(Arc::clone(deps), opportunity, log, cancel), inbox))
}

struct Session {
    deps: Arc<SessionDeps>,
    opportunity: Opportunity,
    own: Pubkey,
    state: StateCell,
    position: Position,
    tracked: TrackedCounterparty,
    log: SessionLogger,
    cancel: CancellationToken,
    sell_policy: SellPolicy,
    ladder_fired: Vec<bool>,
    follow_deadline: Option<Instant>,
    closing_at: Option<Instant>,
    holding_since: Option<DateTime<Utc>>,
    /// A liquidating command ran or the balance reached zero
    liquidated: bool,
    /// Concurrent-buy slot, held until the position closes
    slot: Option<BuySlot>,
}

impl Session {
    fn new(
        deps: Arc<SessionDeps>,
        opportunity: Opportunity,
        log: SessionLogger,
        cancel: CancellationToken,
    ) -> Self {
        let own = deps.executor.wallet();
        let tracked = TrackedCounterparty::new(opportunity.tracked.clone(), opportunity.tracked_initial);
        let sell_policy = SellPolicy::from_config(&deps.policy);
        let ladder_fired = vec![false; deps.policy.take_profit.len()];
        Self {
            deps,
            opportunity,
            own,
            state: StateCell::default(),
            position: Position::default(),
            tracked,
            log,
            cancel,
            sell_policy,
            ladder_fired,
            follow_deadline: None,
            closing_at: None,
            holding_since: None,
            liquidated: false,
            slot: None,
        }
    }

    fn token(&self) -> Pubkey {
        self.opportunity.token
    }

    async fn run(mut self, mut inbox: Inbox) -> Result<(), SessionError> {
        let token = self.token();
        let id = self.log.session_id();
        let deps = Arc::clone(&self.deps);
        let cancel = self.cancel.clone();
        let _guard = scopeguard::guard((), move |_| {
            cancel.cancel();
            deps.timers.stop(&token);
            deps.registry.remove(&token, id);
            deps.buy_cache.remove(&token);
        });

        let fill_slot = match self.open_position().await {
            Ok(slot) => slot,
            Err(e) => {
                let _ = self.state.transition(SessionState::Aborted);
                metrics().sessions_aborted.inc();
                self.log.buy_failure(&e);
                return Err(e);
            }
        };

        let result = self.hold(&mut inbox, fill_slot).await;
        match &result {
            Ok(()) => {}
            Err(SessionError::Cancelled) => {
                info!(
                    session_id = %id,
                    token = %token,
                    remaining = self.position.remaining(),
                    "Session cancelled while holding"
                );
            }
            Err(e) => {
                self.log.error(&format!(
                    "session ended with {} tokens unsold: {e}",
                    self.position.remaining()
                ));
            }
        }
        result
    }

    /// Delay, guard and buy. Returns the slot the buy landed in.
    async fn open_position(&mut self) -> Result<u64, SessionError> {
        let delay = self.opportunity.delay;
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let snapshot = self.deps.hot.snapshot();
        let permit = self
            .deps
            .guard
            .acquire(self.token(), self.tracked.first(), &snapshot)?;
        self.state.transition(SessionState::AwaitingBuyCompletion)?;

        let (route, tip) = self.buy_route();
        let (label, amount) = match &route {
            Route::Venue(ctx) => ("venue", ctx.max_amount_in),
            Route::Aggregator { amount, .. } => ("aggregator", *amount),
        };
        self.log.buy_attempt(label, amount, self.opportunity.slippage_pct);

        let executor = Arc::clone(&self.deps.executor);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            r = executor.execute(route, tip) => r,
        };
        let fill = match result {
            Ok(fill) => fill,
            Err(e) => {
                metrics().record_buy(false);
                return Err(e);
            }
        };

        let tokens = u64::try_from(fill.token_delta.max(0)).unwrap_or(u64::MAX);
        if tokens == 0 {
            metrics().record_buy(false);
            return Err(SessionError::EmptyFill(self.token()));
        }
        let (cost, price) = match self.opportunity.buy {
            BuyPlan::Sol(_) => {
                let cost = fill.sol_delta.min(0).unsigned_abs();
                (cost, price_of(cost, tokens))
            }
            // paid in USDC: value the position at the pool price
            BuyPlan::Usdc(_) => {
                let price = self
                    .deps
                    .pools
                    .price(&self.token())
                    .unwrap_or_else(|| self.opportunity.pool.display_price());
                let cost = price * tokens as f64 / TOKEN_DECIMALS_SCALE * LAMPORTS_PER_SOL as f64;
                (cost.max(0.0) as u64, price)
            }
        };

        self.position.record_buy(tokens, cost, price);
        self.slot = Some(permit.commit());
        metrics().record_buy(true);
        self.log
            .buy_success(&fill.signature, &fill.channel, tokens, cost, fill.slot);
        Ok(fill.slot)
    }

    fn buy_route(&self) -> (Route, u64) {
        let tips = self.deps.tips;
        match self.opportunity.buy {
            BuyPlan::Sol(base_sol) => {
                let sol = self.deps.sizing.scale(base_sol, self.deps.min_buy_sol);
                let lamports = (sol * LAMPORTS_PER_SOL as f64).round() as u64;
                let ctx = TxContext::buy(self.own, self.token(), self.current_pool(), lamports)
                    .with_slippage(self.opportunity.slippage_pct)
                    .with_priority_fee(tips.priority_fee);
                (Route::Venue(ctx), tips.buy)
            }
            BuyPlan::Usdc(amount) => (
                Route::Aggregator {
                    input_mint: USDC_MINT,
                    output_mint: self.token(),
                    amount,
                    slippage_bps: pct_to_bps(self.opportunity.slippage_pct).max(1),
                },
                tips.aggregator,
            ),
        }
    }

    /// Freshest known pool state, falling back to the trigger's copy
    fn current_pool(&self) -> PoolData {
        self.deps
            .pools
            .get(&self.token())
            .map(|state| state.pool())
            .unwrap_or(self.opportunity.pool)
    }

    async fn hold(&mut self, inbox: &mut Inbox, fill_slot: u64) -> Result<(), SessionError> {
        self.state.transition(SessionState::Holding)?;
        self.position.arm();
        self.holding_since = Some(Utc::now());

        let lagged = fill_slot.saturating_sub(self.opportunity.trigger_slot) > 1;
        let hold = if self.opportunity.collapse_hold_on_lag && lagged {
            debug!(token = %self.token(), fill_slot, trigger_slot = self.opportunity.trigger_slot, "Buy landed late, collapsing hold");
            gates::LAGGED_HOLD
        } else {
            self.opportunity.hold
        };

        let (tranche_tx, mut tranche_rx) = mpsc::channel::<TrancheRequest>(STEPS);
        if !hold.is_zero() {
            self.deps
                .timers
                .start(self.token(), hold, tranche_tx, &self.cancel);
        } else {
            drop(tranche_tx);
        }

        let policy = &self.deps.policy;
        if self.opportunity.class == WatchClass::Mint {
            self.follow_deadline = Some(Instant::now() + Duration::from_millis(policy.follow_check_ms));
        }
        let mut ladder = tokio::time::interval(Duration::from_millis(policy.take_profit_interval_ms.max(1)));
        ladder.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut balance_poll = tokio::time::interval(Duration::from_millis(policy.balance_poll_ms.max(1)));
        balance_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let cancel = self.cancel.clone();
        loop {
            let follow_at = self.follow_deadline.unwrap_or_else(Instant::now);
            let closing_at = self.closing_at.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep_until(closing_at), if self.closing_at.is_some() => {
                    if self.finish_if_flat().await? {
                        return Ok(());
                    }
                }
                Some(request) = tranche_rx.recv(), if !self.liquidated => {
                    let amount = request.tranche.amount(self.position.remaining());
                    debug!(token = %request.token, step = request.step, amount, "Hold step expired");
                    let result = self.sell(amount, "hold-step").await;
                    let _ = request.done.send(());
                    self.absorb(result)?;
                }
                Some(command) = inbox.commands.recv() => {
                    debug!(token = %self.token(), %command, "Command received");
                    let price = self.current_price(None);
                    self.run_command(command, price).await?;
                }
                event = inbox.events.recv() => match event {
                    Some(event) => self.on_event(&event).await?,
                    None => return Err(SessionError::Cancelled),
                },
                _ = tokio::time::sleep_until(follow_at), if self.follow_deadline.is_some() => {
                    self.follow_deadline = None;
                    self.log.warn("no outside buyer followed the launch, stopping");
                    let price = self.current_price(None);
                    self.run_command(Command::Stop, price).await?;
                }
                _ = ladder.tick(), if !self.liquidated => {
                    self.check_ladder().await?;
                }
                _ = balance_poll.tick(), if self.closing_at.is_none() => {
                    self.poll_balance().await;
                }
            }
        }
    }

    fn current_price(&self, event: Option<&SwapEvent>) -> f64 {
        if let Some(price) = self.deps.pools.price(&self.token()).filter(|p| *p > 0.0) {
            return price;
        }
        match event {
            Some(e) if e.is_sell() => price_of(e.output_amount, e.input_amount),
            Some(e) if e.input_mint == WSOL_MINT => price_of(e.input_amount, e.output_amount),
            _ => self.position.buy_price(),
        }
    }

    async fn on_event(&mut self, event: &SwapEvent) -> Result<(), SessionError> {
        let price = self.current_price(Some(event));
        let snapshot = self.deps.hot.snapshot();
        let reactions = rules::observe(
            &RuleInput {
                class: self.opportunity.class,
                own: &self.own,
                position: &self.position,
                tracked: &self.tracked,
                policy: &self.deps.policy,
                hot: &snapshot,
                price,
            },
            event,
        );

        for reaction in reactions {
            match reaction {
                Reaction::FollowBuy { signer, at } => self.on_follow_buy(signer, at),
                Reaction::Extend(delta_ms) => {
                    self.deps.timers.extend(&self.token(), delta_ms);
                }
                Reaction::Command(command) => {
                    debug!(token = %self.token(), %command, trigger = %event.signature, "Rule fired");
                    self.run_command(command, price).await?;
                }
            }
        }
        Ok(())
    }

    /// An outside buyer inside the follow window keeps a launch position open
    fn on_follow_buy(&mut self, signer: Pubkey, at: DateTime<Utc>) {
        let (Some(since), Some(_)) = (self.holding_since, self.follow_deadline) else {
            return;
        };
        if signer == self.own || self.tracked.is_tracked(&signer) {
            return;
        }
        let elapsed = (at - since).num_milliseconds();
        if (0..self.deps.policy.follow_window_ms as i64).contains(&elapsed) {
            self.follow_deadline = None;
            info!(token = %self.token(), follower = %signer, elapsed_ms = elapsed, "Launch followed by an outside buyer");
        }
    }

    async fn run_command(&mut self, command: Command, price: f64) -> Result<(), SessionError> {
        if self.liquidated {
            return Ok(());
        }
        let remaining = self.position.remaining();
        let amount = match command {
            Command::Sell | Command::Stop => remaining,
            Command::SellSome => remaining / 3,
            Command::BreakEven => quote::break_even_amount(self.position.buy_price(), price, remaining),
            Command::Mirror {
                sold,
                their_remaining,
            } => quote::sell_proportionally(remaining, sold, their_remaining),
        };

        if command.is_terminal() {
            self.position.disarm();
            self.liquidated = true;
            self.follow_deadline = None;
            self.deps.timers.stop(&self.token());
            if remaining == 0 {
                self.begin_closing();
                return Ok(());
            }
            return self.sell(amount, command.label()).await;
        }
        let result = self.sell(amount, command.label()).await;
        self.absorb(result)
    }

    async fn check_ladder(&mut self) -> Result<(), SessionError> {
        let Some(price) = self.deps.pools.price(&self.token()) else {
            return Ok(());
        };
        let buy_price = self.position.buy_price();
        if buy_price <= 0.0 {
            return Ok(());
        }
        let level = self
            .deps
            .policy
            .take_profit
            .iter()
            .enumerate()
            .find(|(i, (multiple, _))| !self.ladder_fired[*i] && price > buy_price * multiple)
            .map(|(i, &(multiple, fraction))| (i, multiple, fraction));
        let Some((index, multiple, fraction)) = level else {
            return Ok(());
        };

        self.ladder_fired[index] = true;
        let amount = (self.position.bought() as f64 * fraction) as u64;
        info!(token = %self.token(), multiple, fraction, price, buy_price, "Take-profit level reached");
        let result = self.sell(amount, "take-profit").await;
        self.absorb(result)
    }

    async fn poll_balance(&mut self) {
        match self.deps.executor.token_balance(&self.token()).await {
            Ok(0) => {
                info!(token = %self.token(), "Token balance is zero");
                self.position.set_remaining(0);
                self.begin_closing();
            }
            // only shrink: a lagging node may still report sold tokens
            Ok(balance) if balance < self.position.remaining() => self.position.set_remaining(balance),
            Ok(_) => {}
            Err(e) => debug!(token = %self.token(), error = %e, "Balance poll failed"),
        }
    }

    /// Partial sell failures leave the session holding; only cancellation ends it
    fn absorb(&self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        match result {
            Err(SessionError::Cancelled) => Err(SessionError::Cancelled),
            Err(e) => {
                self.log.warn(&format!("partial sell abandoned: {e}"));
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn sell(&mut self, amount: u64, reason: &str) -> Result<(), SessionError> {
        if amount == 0 {
            return Ok(());
        }
        self.state.transition(SessionState::StagedSelling)?;
        let executor = Arc::clone(&self.deps.executor);
        let tips = self.deps.tips;
        let mut attempt = self.sell_policy.first_attempt();

        loop {
            let remaining = self.position.remaining();
            let amount = amount.min(remaining);
            if amount == 0 {
                if remaining == 0 {
                    self.begin_closing();
                }
                return Ok(());
            }

            self.log
                .sell_attempt(reason, amount, remaining, attempt.slippage_pct, attempt.failures + 1);
            let mut ctx = TxContext::sell(self.own, self.token(), self.current_pool(), amount)
                .with_slippage(attempt.slippage_pct)
                .with_priority_fee(tips.priority_fee);
            if amount >= remaining {
                ctx = ctx.closing();
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                r = executor.execute(Route::Venue(ctx), tips.sell) => r,
            };
            let error = match result {
                Ok(fill) => {
                    self.record_sell(&fill, amount);
                    return Ok(());
                }
                Err(SessionError::DryRun) => return Err(SessionError::DryRun),
                Err(e) => e,
            };

            metrics().sell_failures.inc();
            self.log.sell_failure(&error, attempt.failures + 1);
            match self.sell_policy.on_failure(&mut attempt, error.program_error_kind()) {
                NextStep::TreatAsClosed => {
                    info!(token = %self.token(), "Token account already closed, treating the position as sold");
                    self.position.set_remaining(0);
                    self.begin_closing();
                    return Ok(());
                }
                NextStep::Retry { requery, backoff } => {
                    if requery {
                        match executor.token_balance(&self.token()).await {
                            Ok(balance) => self.position.set_remaining(balance),
                            Err(e) => debug!(token = %self.token(), error = %e, "Balance requery failed"),
                        }
                    }
                    if !backoff.is_zero() {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
                NextStep::Fallback => return self.sell_via_aggregator(amount, reason).await,
            }
        }
    }

    async fn sell_via_aggregator(&mut self, amount: u64, reason: &str) -> Result<(), SessionError> {
        let slippage_bps = self.sell_policy.fallback_bps();
        info!(token = %self.token(), amount, slippage_bps, reason, "Venue sells exhausted, trying the aggregator");
        let route = Route::Aggregator {
            input_mint: self.token(),
            output_mint: WSOL_MINT,
            amount,
            slippage_bps,
        };
        let executor = Arc::clone(&self.deps.executor);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            r = executor.execute(route, self.deps.tips.aggregator) => r,
        };
        match result {
            Ok(fill) => {
                self.record_sell(&fill, amount);
                Ok(())
            }
            Err(e) => {
                metrics().record_sell(false);
                Err(SessionError::SellExhausted {
                    token: self.token(),
                    attempts: self.sell_policy.ceiling(),
                    last: e.to_string(),
                })
            }
        }
    }

    fn record_sell(&mut self, fill: &Fill, requested: u64) {
        let sold = if fill.token_delta < 0 {
            u64::try_from(fill.token_delta.unsigned_abs()).unwrap_or(u64::MAX)
        } else {
            requested
        };
        let price = price_of(fill.sol_delta.max(0).unsigned_abs(), sold);
        let remaining = self.position.record_sell(sold, fill.sol_delta, price);
        metrics().record_sell(true);
        self.log
            .sell_success(&fill.signature, &fill.channel, sold, fill.sol_delta, remaining);
        if remaining == 0 {
            self.begin_closing();
        }
    }

    /// Nothing left to sell: wait out the close check before settling
    fn begin_closing(&mut self) {
        if self.closing_at.is_some() {
            return;
        }
        self.position.disarm();
        self.liquidated = true;
        self.follow_deadline = None;
        self.deps.timers.stop(&self.token());
        let wait = Duration::from_millis(self.deps.policy.close_check_ms);
        self.closing_at = Some(Instant::now() + wait);
        debug!(token = %self.token(), wait_ms = wait.as_millis() as u64, "Position flat, close check armed");
    }

    /// True when the chain agrees the position is gone and the session is settled
    async fn finish_if_flat(&mut self) -> Result<bool, SessionError> {
        self.closing_at = None;
        let balance = match self.deps.executor.token_balance(&self.token()).await {
            Ok(balance) => balance,
            Err(e) => {
                debug!(token = %self.token(), error = %e, "Close check balance query failed");
                self.position.remaining()
            }
        };
        if balance > 0 {
            self.log
                .warn(&format!("{balance} tokens still held after the close check, resuming"));
            self.position.set_remaining(balance);
            self.liquidated = false;
            self.position.arm();
            return Ok(false);
        }

        self.state.transition(SessionState::Closed)?;
        let record = ClosedPosition {
            closed_at: Local::now(),
            token: self.token(),
            cost_lamports: self.position.cost_lamports(),
            profit_lamports: self.position.profit_lamports(),
        };
        self.log
            .session_closed(record.cost_lamports, record.profit_lamports);
        metrics().sessions_closed.inc();
        self.deps.profits.publish(record);
        self.slot.take();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hot_config::HotSnapshot;
    use crate::rpc_manager::RelayError;
    use crate::types::fixtures::buy_event;
    use crate::types::PumpFunPool;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use solana_sdk::signature::Signature;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Plays back scripted outcomes and tracks the token balance they imply
    struct ScriptedExecutor {
        wallet: Pubkey,
        script: Mutex<VecDeque<Result<Fill, SessionError>>>,
        routes: Mutex<Vec<Route>>,
        balance: AtomicU64,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<Result<Fill, SessionError>>) -> Self {
            Self {
                wallet: Pubkey::new_unique(),
                script: Mutex::new(script.into()),
                routes: Mutex::new(Vec::new()),
                balance: AtomicU64::new(0),
            }
        }

        fn routes(&self) -> Vec<Route> {
            self.routes.lock().clone()
        }
    }

    #[async_trait]
    impl TradeExecutor for ScriptedExecutor {
        fn wallet(&self) -> Pubkey {
            self.wallet
        }

        async fn execute(&self, route: Route, _tip_lamports: u64) -> Result<Fill, SessionError> {
            self.routes.lock().push(route);
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or(Err(SessionError::NoBlockhash));
            if let Ok(fill) = &next {
                let balance = self.balance.load(Ordering::SeqCst) as i128 + fill.token_delta;
                self.balance.store(balance.max(0) as u64, Ordering::SeqCst);
            }
            next
        }

        async fn token_balance(&self, _mint: &Pubkey) -> Result<u64, SessionError> {
            Ok(self.balance.load(Ordering::SeqCst))
        }
    }

    fn fill(sol_delta: i64, token_delta: i128) -> Result<Fill, SessionError> {
        Ok(Fill {
            signature: Signature::new_unique(),
            slot: 101,
            sol_delta,
            token_delta,
            channel: "test".into(),
        })
    }

    fn deps(executor: Arc<ScriptedExecutor>, max_buys: u64) -> Arc<SessionDeps> {
        let policy = PolicyConfig::default();
        Arc::new(SessionDeps {
            executor,
            registry: Arc::new(SessionRegistry::new()),
            guard: Arc::new(BuyGuard::new(max_buys, Duration::from_secs(60))),
            timers: Arc::new(HoldTimers::new()),
            hot: Arc::new(HotConfig::from_snapshot(HotSnapshot::default())),
            pools: Arc::new(PoolRegistry::new()),
            buy_cache: Arc::new(BuyCache::new(64, Duration::from_secs(60))),
            sizing: Arc::new(PositionSizing::from_policy(&policy)),
            profits: ProfitBus::new(8),
            policy,
            tips: TipSchedule::default(),
            min_buy_sol: 0.05,
            event_buffer: 16,
        })
    }

    fn opportunity(class: WatchClass, hold: Duration) -> Opportunity {
        Opportunity {
            class,
            token: Pubkey::new_unique(),
            trigger_signature: Signature::new_unique(),
            trigger_slot: 100,
            pool: PoolData::PumpFun(PumpFunPool {
                creator: Pubkey::new_unique(),
                virtual_sol_reserves: 30_000_000_000,
                virtual_token_reserves: 1_000_000_000_000_000,
                real_sol_reserves: 1_000_000_000,
                real_token_reserves: 800_000_000_000_000,
            }),
            tracked: vec![],
            tracked_input_mint: WSOL_MINT,
            tracked_initial: 0,
            buy: BuyPlan::Sol(0.2),
            slippage_pct: 30.0,
            hold,
            delay: Duration::ZERO,
            collapse_hold_on_lag: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_exit_on_first_outside_buy() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            fill(-200_000_000, 1_000_000),
            fill(150_000_000, -1_000_000),
        ]));
        let deps = deps(Arc::clone(&executor), 4);
        let mut profits = deps.profits.subscribe();
        let opp = opportunity(WatchClass::Mint, Duration::ZERO);
        let token = opp.token;

        let root = CancellationToken::new();
        let handle = open(&deps, opp, &root).unwrap();
        let mut duplicate = opportunity(WatchClass::Mint, Duration::ZERO);
        duplicate.token = token;
        assert!(matches!(
            open(&deps, duplicate, &root),
            Err(SessionError::AlreadyLive(t)) if t == token
        ));

        // an outside buyer at a price below the break-even gain
        let event = Arc::new(buy_event(Pubkey::new_unique(), token, 100_000_000, 1_000_000));
        assert!(deps.registry.dispatch(&event));

        handle.await.unwrap().unwrap();
        let record = profits.recv().await.unwrap();
        assert_eq!(record.token, token);
        assert_eq!(record.cost_lamports, 200_000_000);
        assert_eq!(record.profit_lamports, -50_000_000);

        let routes = executor.routes();
        assert!(matches!(&routes[0], Route::Venue(ctx) if ctx.is_buy() && ctx.max_amount_in == 200_000_000));
        assert!(matches!(&routes[1], Route::Venue(ctx) if !ctx.is_buy() && ctx.max_amount_in == 1_000_000 && ctx.close_token_account));
        assert!(!deps.registry.contains(&token));
        assert!(!deps.buy_cache.contains(&token));
        root.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_failure_aborts_and_releases() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err(SessionError::Relay(
            RelayError::AllChannelsFailed {
                count: 3,
                last: "timeout".into(),
            },
        ))]));
        let deps = deps(Arc::clone(&executor), 4);
        let opp = opportunity(WatchClass::Smart, Duration::from_secs(1));
        let token = opp.token;
        deps.buy_cache.insert_if_absent(token);

        let handle = open(&deps, opp, &CancellationToken::new()).unwrap();
        assert!(matches!(handle.await.unwrap(), Err(SessionError::Relay(_))));
        assert_eq!(deps.guard.count(), 0);
        assert!(!deps.registry.contains(&token));
        assert!(!deps.buy_cache.contains(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_rejects_before_any_order() {
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let deps = deps(Arc::clone(&executor), 0);
        let handle = open(&deps, opportunity(WatchClass::Smart, Duration::ZERO), &CancellationToken::new()).unwrap();
        assert!(matches!(handle.await.unwrap(), Err(SessionError::Guard(_))));
        assert!(executor.routes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_falls_back_to_aggregator_after_ceiling() {
        let mut script = vec![fill(-200_000_000, 1_000_000)];
        script.extend((0..10).map(|_| Err(SessionError::NoBlockhash)));
        script.push(fill(180_000_000, -1_000_000));
        let executor = Arc::new(ScriptedExecutor::new(script));
        let deps = deps(Arc::clone(&executor), 4);
        let opp = opportunity(WatchClass::Mint, Duration::ZERO);
        let token = opp.token;

        let handle = open(&deps, opp, &CancellationToken::new()).unwrap();
        let event = Arc::new(buy_event(Pubkey::new_unique(), token, 100_000_000, 1_000_000));
        deps.registry.dispatch(&event);
        handle.await.unwrap().unwrap();

        let routes = executor.routes();
        assert_eq!(routes.len(), 12);
        assert!(matches!(
            routes.last(),
            Some(Route::Aggregator { input_mint, output_mint, slippage_bps: 10_000, .. })
                if *input_mint == token && *output_mint == WSOL_MINT
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfollowed_launch_is_stopped() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            fill(-200_000_000, 1_000_000),
            fill(190_000_000, -1_000_000),
        ]));
        let deps = deps(Arc::clone(&executor), 4);
        let handle = open(&deps, opportunity(WatchClass::Mint, Duration::ZERO), &CancellationToken::new()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(executor.routes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_holding() {
        let executor = Arc::new(ScriptedExecutor::new(vec![fill(-200_000_000, 1_000_000)]));
        let deps = deps(Arc::clone(&executor), 4);
        let root = CancellationToken::new();
        let opp = opportunity(WatchClass::Smart, Duration::from_secs(30));
        let token = opp.token;
        let handle = open(&deps, opp, &root).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(deps.timers.is_active(&token));
        root.cancel();
        assert!(matches!(handle.await.unwrap(), Err(SessionError::Cancelled)));
        assert!(!deps.timers.is_active(&token));
        assert!(deps.registry.is_empty());
    }
}
