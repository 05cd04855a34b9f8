//! Session lifecycle against a scripted executor
//!
//! A smart-wallet position of 900 tokens with a 1s hold is sold in three
//! hold-timer tranches of 300 (a third, half of the rest, then the rest),
//! each step half as long as the one before, then settles after the close
//! check.

use async_trait::async_trait;
use curve_sniper::config::PolicyConfig;
use curve_sniper::hold_timer::HoldTimers;
use curve_sniper::hot_config::{HotConfig, HotSnapshot};
use curve_sniper::profit::{PositionSizing, ProfitBus};
use curve_sniper::session::{
    open, BuyGuard, Command, Fill, Route, SessionDeps, SessionError, SessionRegistry,
    TipSchedule, TradeExecutor,
};
use curve_sniper::sniffer::{BuyCache, PoolRegistry};
use curve_sniper::trigger::{BuyPlan, Opportunity};
use curve_sniper::types::{PoolData, PumpFunPool, WatchClass, WSOL_MINT};
use parking_lot::Mutex;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct ScriptedExecutor {
    wallet: Pubkey,
    started: Instant,
    script: Mutex<VecDeque<Result<Fill, SessionError>>>,
    orders: Mutex<Vec<(Duration, Route)>>,
    balance: AtomicU64,
}

impl ScriptedExecutor {
    fn new(script: Vec<Result<Fill, SessionError>>) -> Arc<Self> {
        Arc::new(Self {
            wallet: Pubkey::new_unique(),
            started: Instant::now(),
            script: Mutex::new(script.into()),
            orders: Mutex::new(Vec::new()),
            balance: AtomicU64::new(0),
        })
    }

    fn orders(&self) -> Vec<(Duration, Route)> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl TradeExecutor for ScriptedExecutor {
    fn wallet(&self) -> Pubkey {
        self.wallet
    }

    async fn execute(&self, route: Route, _tip_lamports: u64) -> Result<Fill, SessionError> {
        self.orders.lock().push((self.started.elapsed(), route));
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
        channel: "rpc".into(),
    })
}

fn deps(executor: Arc<ScriptedExecutor>) -> Arc<SessionDeps> {
    let policy = PolicyConfig::default();
    Arc::new(SessionDeps {
        executor,
        registry: Arc::new(SessionRegistry::new()),
        guard: Arc::new(BuyGuard::new(4, Duration::from_secs(60))),
        timers: Arc::new(HoldTimers::new()),
        hot: Arc::new(HotConfig::from_snapshot(HotSnapshot::default())),
        pools: Arc::new(PoolRegistry::new()),
        buy_cache: Arc::new(BuyCache::new(16, Duration::from_secs(60))),
        sizing: Arc::new(PositionSizing::from_policy(&policy)),
        profits: ProfitBus::new(8),
        policy,
        tips: TipSchedule::default(),
        min_buy_sol: 0.05,
        event_buffer: 16,
    })
}

fn smart_opportunity(hold: Duration) -> Opportunity {
    Opportunity {
        class: WatchClass::Smart,
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
        tracked: vec![Pubkey::new_unique()],
        tracked_input_mint: WSOL_MINT,
        tracked_initial: 5_000,
        buy: BuyPlan::Sol(0.2),
        slippage_pct: 0.002,
        hold,
        delay: Duration::ZERO,
        collapse_hold_on_lag: false,
    }
}

fn sell_amount(route: &Route) -> (u64, bool) {
    match route {
        Route::Venue(ctx) if !ctx.is_buy() => (ctx.max_amount_in, ctx.close_token_account),
        other => panic!("expected a venue sell, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hold_timer_sells_in_three_tranches() {
    let executor = ScriptedExecutor::new(vec![
        fill(-200_000_000, 900),
        fill(60_000_000, -300),
        fill(60_000_000, -300),
        fill(60_000_000, -300),
    ]);
    let deps = deps(Arc::clone(&executor));
    let mut profits = deps.profits.subscribe();
    let opportunity = smart_opportunity(Duration::from_secs(1));
    let token = opportunity.token;

    let handle = open(&deps, opportunity, &CancellationToken::new()).unwrap();
    handle.await.unwrap().unwrap();

    let orders = executor.orders();
    assert_eq!(orders.len(), 4);
    assert!(matches!(&orders[0].1, Route::Venue(ctx) if ctx.is_buy() && ctx.max_amount_in == 200_000_000));

    let sells: Vec<(u64, bool)> = orders[1..].iter().map(|(_, r)| sell_amount(r)).collect();
    assert_eq!(sells, vec![(300, false), (300, false), (300, true)]);

    let at: Vec<Duration> = orders[1..].iter().map(|(t, _)| *t).collect();
    assert_eq!(at[0], Duration::from_millis(1_000));
    assert_eq!(at[1], Duration::from_millis(1_500));
    assert_eq!(at[2], Duration::from_millis(1_750));

    let record = profits.recv().await.unwrap();
    assert_eq!(record.token, token);
    assert_eq!(record.cost_lamports, 200_000_000);
    assert_eq!(record.profit_lamports, -20_000_000);

    assert!(!deps.registry.contains(&token));
    assert!(!deps.timers.is_active(&token));
    assert_eq!(deps.guard.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_tranche_keeps_position_open() {
    // the first tranche fails once and lands on the retry
    let executor = ScriptedExecutor::new(vec![
        fill(-200_000_000, 900),
        Err(SessionError::NoBlockhash),
        fill(70_000_000, -300),
        fill(70_000_000, -300),
        fill(70_000_000, -300),
    ]);
    let deps = deps(Arc::clone(&executor));
    let mut profits = deps.profits.subscribe();
    let opportunity = smart_opportunity(Duration::from_millis(400));

    let handle = open(&deps, opportunity, &CancellationToken::new()).unwrap();
    handle.await.unwrap().unwrap();

    let orders = executor.orders();
    assert_eq!(orders.len(), 5);
    assert_eq!(sell_amount(&orders[1].1), (300, false));
    assert_eq!(sell_amount(&orders[2].1), (300, false));
    assert_eq!(sell_amount(&orders[4].1), (300, true));

    let record = profits.recv().await.unwrap();
    assert_eq!(record.profit_lamports, 10_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_a_holding_session() {
    let executor = ScriptedExecutor::new(vec![fill(-200_000_000, 900)]);
    let deps = deps(Arc::clone(&executor));
    let opportunity = smart_opportunity(Duration::from_secs(30));
    let token = opportunity.token;

    let root = CancellationToken::new();
    let handle = open(&deps, opportunity, &root).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(deps.timers.is_active(&token));

    root.cancel();
    assert!(matches!(handle.await.unwrap(), Err(SessionError::Cancelled)));
    assert!(!deps.registry.contains(&token));
    assert!(!deps.timers.is_active(&token));
    // the session released the guard slot when it dropped
    assert_eq!(deps.guard.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sell_some_command_sells_a_third() {
    let executor = ScriptedExecutor::new(vec![fill(-200_000_000, 900), fill(70_000_000, -300)]);
    let deps = deps(Arc::clone(&executor));
    let opportunity = smart_opportunity(Duration::from_secs(30));
    let token = opportunity.token;

    let root = CancellationToken::new();
    let handle = open(&deps, opportunity, &root).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(deps.registry.command(&token, Command::SellSome));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let orders = executor.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(sell_amount(&orders[1].1), (300, false));
    // a partial command keeps the position and its hold timer
    assert!(deps.timers.is_active(&token));

    root.cancel();
    assert!(matches!(handle.await.unwrap(), Err(SessionError::Cancelled)));
    assert!(!deps.registry.command(&token, Command::Sell));
}
