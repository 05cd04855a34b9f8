//! Engine wiring
//!
//! Builds every service once and hands them out by `Arc`. `start` spawns the
//! pipeline under the supervisor:
//!
//! ```text
//! feeds -> ingest -> class routers -> dispatcher -> sessions
//!                \-> follow route  -> live sessions
//! ```
//!
//! Pausing stops new triggers only; live sessions keep managing their
//! positions. `stop` cancels the root token, then waits for the workers and
//! the sessions.

use crate::config::{parse_pubkeys, Config};
use crate::hold_timer::HoldTimers;
use crate::hot_config::HotConfig;
use crate::metrics::metrics;
use crate::nonce_manager::{self, NoncePool};
use crate::profit::{self, PositionSizing, ProfitBus, ProfitController};
use crate::rpc_manager::bundle_relay::BundleRelay;
use crate::rpc_manager::grpc_relay::GrpcRelay;
use crate::rpc_manager::http_relay::HttpRelay;
use crate::rpc_manager::rpc_channel::RpcChannel;
use crate::rpc_manager::{BlockhashCache, ConfirmationWaiter, JupiterRoute, RelayChannel, RelayRacer};
use crate::session::{
    self, mirror_sell, BuyGuard, ChainExecutor, SellPolicy, SessionDeps, SessionRegistry, TipSchedule,
    TradeExecutor,
};
use crate::sniffer::{
    BuyCache, EngineState, Ingest, IngestRoutes, PoolRegistry, SignatureDeduper, Supervisor, SwapFeed,
    WorkerHandle, WsJsonFeed,
};
use crate::trigger::{Trigger, TriggerAction, WatchSet};
use crate::types::WatchClass;
use crate::wallet::{BalanceWatcher, WalletManager};
use anyhow::{Context, Result};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const NONCE_POLL_FALLBACK: Duration = Duration::from_secs(1);
const BLOCKHASH_REFRESH: Duration = Duration::from_millis(400);
const BALANCE_REFRESH: Duration = Duration::from_secs(1);
const SUPERVISOR_CHECK: Duration = Duration::from_secs(1);
const PROFIT_BUS_CAPACITY: usize = 256;
const SESSION_INBOX: usize = 256;

/// Chain-facing services, absent when the engine runs on an injected executor
struct LiveServices {
    rpc: Arc<RpcClient>,
    ws_url: String,
    nonces: Arc<NoncePool>,
    blockhash: Arc<BlockhashCache>,
    owner: Pubkey,
}

pub struct Engine {
    config: Config,
    supervisor: Arc<Supervisor>,
    hot: Arc<HotConfig>,
    pools: Arc<PoolRegistry>,
    dedup: Arc<SignatureDeduper>,
    balance: Arc<BalanceWatcher>,
    trigger: Arc<Trigger>,
    deps: Arc<SessionDeps>,
    paused: Arc<AtomicBool>,
    sessions: TaskTracker,
    live: Option<LiveServices>,
}

impl Engine {
    /// Build the live engine: RPC client, relay channels, nonce pool, aggregator
    pub fn new(config: Config, wallet: &WalletManager, dry_run: bool) -> Result<Self> {
        let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
            config.rpc.http_url.clone(),
            Duration::from_secs(config.rpc.timeout_secs),
            CommitmentConfig::confirmed(),
        ));
        let relay = &config.relay;
        let channel_timeout = Duration::from_secs(config.rpc.timeout_secs);

        let mut channels: Vec<Arc<dyn RelayChannel>> = Vec::new();
        if !relay.bundle_endpoints.is_empty() {
            channels.push(Arc::new(BundleRelay::new(
                relay.bundle_endpoints.clone(),
                parse_pubkeys("relay.bundle_tip_accounts", &relay.bundle_tip_accounts)?,
                channel_timeout,
            )?));
        }
        if !relay.grpc_endpoints.is_empty() {
            channels.push(Arc::new(GrpcRelay::new(
                relay.grpc_endpoints.clone(),
                std::env::var(&relay.grpc_api_key_env).ok(),
                parse_pubkeys("relay.grpc_tip_accounts", &relay.grpc_tip_accounts)?,
                channel_timeout,
            )?));
        }
        if !relay.http_urls.is_empty() {
            channels.push(Arc::new(HttpRelay::new(
                "http",
                relay.http_urls.clone(),
                std::env::var(&relay.http_api_key_env).ok(),
                parse_pubkeys("relay.http_tip_accounts", &relay.http_tip_accounts)?,
                channel_timeout,
            )?));
        }
        let rpc_channel = Arc::new(RpcChannel::new(Arc::clone(&rpc)));
        channels.push(rpc_channel.clone());
        let racer = Arc::new(RelayRacer::new(channels, relay.race_timeout()));
        info!(channels = ?racer.channel_names(), "Relay racer ready");

        let confirm = Arc::new(ConfirmationWaiter::new(Arc::clone(&rpc), relay.confirm_timeout()));
        let aggregator = Arc::new(JupiterRoute::new(
            relay.aggregator_url.clone(),
            relay.aggregator_rps,
            channel_timeout,
            rpc_channel,
        )?);

        let authority = match &config.nonce.authority {
            Some(authority) => parse_pubkeys("nonce.authority", std::slice::from_ref(authority))?[0],
            None => wallet.pubkey(),
        };
        let nonces = Arc::new(NoncePool::new(
            parse_pubkeys("nonce.accounts", &config.nonce.accounts)?,
            authority,
        ));
        let blockhash = Arc::new(BlockhashCache::new());

        let executor = Arc::new(ChainExecutor::new(
            wallet.keypair_arc(),
            Arc::clone(&rpc),
            racer,
            confirm,
            Arc::clone(&nonces),
            Arc::clone(&blockhash),
            aggregator,
            dry_run,
        ));
        let live = LiveServices {
            rpc,
            ws_url: config.rpc.ws_url.clone(),
            nonces,
            blockhash,
            owner: wallet.pubkey(),
        };
        Self::assemble(config, executor, Some(live))
    }

    /// Engine over an injected executor; no chain refresh workers are started
    pub fn with_executor(config: Config, executor: Arc<dyn TradeExecutor>) -> Result<Self> {
        Self::assemble(config, executor, None)
    }

    fn assemble(
        config: Config,
        executor: Arc<dyn TradeExecutor>,
        live: Option<LiveServices>,
    ) -> Result<Self> {
        let engine = &config.engine;
        let hot = Arc::new(HotConfig::load(config.hot_config.clone()).context("Failed to load hot config")?);
        let pools = Arc::new(PoolRegistry::new());
        let buy_cache = Arc::new(BuyCache::new(
            engine.buy_cache_capacity,
            Duration::from_secs(engine.buy_cache_ttl_secs),
        ));
        let dedup = Arc::new(SignatureDeduper::new(engine.dedup_capacity, engine.dedup_fpr));
        let balance = Arc::new(BalanceWatcher::new());
        let trigger = Arc::new(Trigger::new(
            Arc::clone(&hot),
            Arc::clone(&pools),
            Arc::clone(&buy_cache),
            Arc::clone(&balance),
            engine.balance_floor,
        ));

        let deps = Arc::new(SessionDeps {
            executor,
            registry: Arc::new(SessionRegistry::new()),
            guard: Arc::new(BuyGuard::new(
                engine.max_concurrent_buys,
                Duration::from_millis(engine.cooldown_ms),
            )),
            timers: Arc::new(HoldTimers::new()),
            hot: Arc::clone(&hot),
            pools: Arc::clone(&pools),
            buy_cache,
            sizing: Arc::new(PositionSizing::from_policy(&config.policy)),
            profits: ProfitBus::new(PROFIT_BUS_CAPACITY),
            policy: config.policy.clone(),
            tips: TipSchedule::from_config(&config.relay),
            min_buy_sol: engine.min_buy_sol,
            event_buffer: SESSION_INBOX,
        });

        Ok(Self {
            config,
            supervisor: Arc::new(Supervisor::new()),
            hot,
            pools,
            dedup,
            balance,
            trigger,
            deps,
            paused: Arc::new(AtomicBool::new(false)),
            sessions: TaskTracker::new(),
            live,
        })
    }

    pub fn state(&self) -> EngineState {
        self.supervisor.state()
    }

    pub fn profits(&self) -> &ProfitBus {
        &self.deps.profits
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.deps.registry
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    pub fn balance(&self) -> &Arc<BalanceWatcher> {
        &self.balance
    }

    /// Start with one WebSocket feed per configured URL
    pub async fn start(&self) -> Result<()> {
        let feeds = self
            .config
            .feeds
            .urls
            .iter()
            .map(|url| {
                let feed = WsJsonFeed::new(url.clone());
                let feed = match &self.config.feeds.subscribe {
                    Some(message) => feed.with_subscribe(message.clone()),
                    None => feed,
                };
                Arc::new(feed) as Arc<dyn SwapFeed>
            })
            .collect();
        self.start_with_feeds(feeds).await
    }

    pub async fn start_with_feeds(&self, feeds: Vec<Arc<dyn SwapFeed>>) -> Result<()> {
        if feeds.is_empty() {
            warn!("No feeds configured, the engine will not see any trades");
        }
        self.supervisor.start()?;
        let buffer = self.config.feeds.buffer.max(1);
        let sup = &self.supervisor;

        let classes = [WatchClass::Mint, WatchClass::Smart, WatchClass::Scm];
        let mut class_routes = Vec::with_capacity(classes.len());
        let mut class_inputs = Vec::with_capacity(classes.len());
        for class in classes {
            let (tx, rx) = mpsc::channel(buffer);
            class_routes.push((class, tx));
            class_inputs.push((class, rx));
        }
        let (follow_tx, follow_rx) = mpsc::channel(buffer);
        let (action_tx, action_rx) = mpsc::channel::<TriggerAction>(buffer);

        let ingest = Ingest::new(
            Arc::clone(&self.dedup),
            Arc::clone(&self.pools),
            Arc::new(WatchSet::new(Arc::clone(&self.hot), self.config.engine.scm_enabled)),
            IngestRoutes {
                classes: class_routes,
                follow: follow_tx,
            },
            Arc::clone(&self.paused),
        );

        for feed in feeds {
            let (tx, rx) = mpsc::channel(buffer);
            let name = feed.name().to_string();
            let cancel = sup.child_token();
            sup.spawn(format!("feed:{name}"), false, {
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = feed.run(tx, cancel).await {
                        warn!(feed = %name, error = %e, "Feed stopped with error");
                    }
                }
            })
            .await;
            sup.spawn("ingest", true, ingest.clone().run(rx, cancel)).await;
        }

        for (class, rx) in class_inputs {
            let trigger = Arc::clone(&self.trigger);
            sup.spawn(
                format!("trigger:{class}"),
                true,
                trigger.run_class(class, rx, action_tx.clone(), sup.child_token()),
            )
            .await;
        }
        drop(action_tx);

        sup.spawn(
            "follow",
            true,
            Arc::clone(&self.deps.registry).run_follow(follow_rx, sup.child_token()),
        )
        .await;
        sup.spawn(
            "dispatcher",
            true,
            dispatch_actions(
                Arc::clone(&self.deps),
                action_rx,
                sup.child_token(),
                self.sessions.clone(),
            ),
        )
        .await;

        self.spawn_support_workers().await;

        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move { supervisor.monitor_workers(SUPERVISOR_CHECK).await });
        info!("Engine started");
        Ok(())
    }

    async fn spawn_support_workers(&self) {
        let sup = &self.supervisor;

        if let Some(live) = &self.live {
            match nonce_manager::refresh_all(&live.nonces, &live.rpc).await {
                Ok(ready) => info!(ready, total = live.nonces.len(), "Nonce pool primed"),
                Err(e) => warn!(error = %e, "Initial nonce fetch failed"),
            }
            let poll = Duration::from_millis(self.config.nonce.poll_interval_ms.max(1))
                .min(NONCE_POLL_FALLBACK);
            let handle = nonce_manager::spawn_poll_worker(
                Arc::clone(&live.nonces),
                Arc::clone(&live.rpc),
                poll,
                sup.child_token(),
            );
            sup.register_worker(WorkerHandle::new("nonce-poll", handle, false))
                .await;
            for account in live.nonces.accounts().collect::<Vec<_>>() {
                let handle = nonce_manager::spawn_subscription_worker(
                    Arc::clone(&live.nonces),
                    live.ws_url.clone(),
                    account,
                    sup.child_token(),
                );
                sup.register_worker(WorkerHandle::new(
                    format!("nonce-sub:{account}"),
                    handle,
                    false,
                ))
                .await;
            }

            let handle = Arc::clone(&live.blockhash).spawn_refresh_worker(
                Arc::clone(&live.rpc),
                BLOCKHASH_REFRESH,
                sup.child_token(),
            );
            sup.register_worker(WorkerHandle::new("blockhash", handle, true))
                .await;

            let handle = Arc::clone(&self.balance).spawn_refresh_worker(
                Arc::clone(&live.rpc),
                live.owner,
                BALANCE_REFRESH,
                sup.child_token(),
            );
            sup.register_worker(WorkerHandle::new("balance", handle, false))
                .await;
        }

        let handle = Arc::clone(&self.hot).spawn_reloader(
            Duration::from_secs(self.config.hot_config.reload_interval_secs.max(1)),
            sup.child_token(),
        );
        sup.register_worker(WorkerHandle::new("hot-config", handle, false))
            .await;

        let handle = profit::spawn_csv_writer(
            self.config.engine.profit_csv.clone(),
            self.deps.profits.subscribe(),
            sup.child_token(),
        );
        sup.register_worker(WorkerHandle::new("profit-csv", handle, false))
            .await;

        let controller = ProfitController::new(Arc::clone(&self.deps.sizing), &self.config.policy);
        sup.spawn(
            "profit-controller",
            false,
            controller.run(self.deps.profits.subscribe(), sup.child_token()),
        )
        .await;

        sup.spawn(
            "stats",
            false,
            report_stats(
                Arc::clone(&self.deps),
                Duration::from_secs(self.config.engine.stats_interval_secs.max(1)),
                sup.child_token(),
            ),
        )
        .await;
    }

    /// Drop new triggers; live sessions keep running
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.supervisor.pause();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.supervisor.resume();
    }

    /// Cancel everything and wait, up to `timeout` in total
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        self.deps.registry.cancel_all();
        self.supervisor.stop(timeout).await?;

        self.sessions.close();
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        if tokio::time::timeout(left, self.sessions.wait()).await.is_err() {
            warn!(live = self.sessions.len(), "Sessions did not finish before the stop timeout");
        }
        info!("Engine stopped");
        Ok(())
    }
}

/// Turn trigger actions into sessions and mirror sells
async fn dispatch_actions(
    deps: Arc<SessionDeps>,
    mut rx: mpsc::Receiver<TriggerAction>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let policy = SellPolicy::from_config(&deps.policy);
    loop {
        let action = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            action = rx.recv() => match action {
                Some(action) => action,
                None => break,
            },
        };

        match action {
            TriggerAction::Open(opportunity) => {
                let token = opportunity.token;
                match session::open_tracked(&deps, *opportunity, &cancel, &tracker) {
                    Ok(_) => debug!(token = %token, "Session spawned"),
                    Err(e) => debug!(token = %token, error = %e, "Session not opened"),
                }
            }
            TriggerAction::Mirror(order) => {
                let deps = Arc::clone(&deps);
                let cancel = cancel.child_token();
                tracker.spawn(async move {
                    let result = mirror_sell(
                        deps.executor.as_ref(),
                        order,
                        deps.tips.aggregator,
                        policy.fallback_bps(),
                        policy.ceiling(),
                        &cancel,
                    )
                    .await;
                    if let Err(e) = result {
                        warn!(token = %order.token, error = %e, "Mirror sell gave up");
                    }
                });
            }
        }
    }
    debug!("Action dispatcher stopped");
}

async fn report_stats(deps: Arc<SessionDeps>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let m = metrics();
                info!(
                    live_sessions = deps.registry.len(),
                    hold_timers = deps.timers.len(),
                    multiplier = deps.sizing.multiplier(),
                    events = m.events_received.get(),
                    duplicates = m.events_duplicate.get(),
                    opened = m.sessions_opened.get(),
                    closed = m.sessions_closed.get(),
                    aborted = m.sessions_aborted.get(),
                    "Engine stats"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Fill, Route};
    use crate::sniffer::SnifferError;
    use crate::types::SwapEvent;
    use async_trait::async_trait;

    struct NoTrades;

    #[async_trait]
    impl TradeExecutor for NoTrades {
        fn wallet(&self) -> Pubkey {
            Pubkey::default()
        }

        async fn execute(&self, _route: Route, _tip: u64) -> Result<Fill, session::SessionError> {
            Err(session::SessionError::DryRun)
        }

        async fn token_balance(&self, _mint: &Pubkey) -> Result<u64, session::SessionError> {
            Ok(0)
        }
    }

    struct IdleFeed;

    #[async_trait]
    impl SwapFeed for IdleFeed {
        fn name(&self) -> &str {
            "idle"
        }

        async fn run(
            &self,
            _tx: mpsc::Sender<SwapEvent>,
            cancel: CancellationToken,
        ) -> Result<(), SnifferError> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.hot_config.strategy = dir.path().join("strategy.yaml");
        config.hot_config.blacklist = dir.path().join("mint.yaml");
        config.hot_config.robots = dir.path().join("robot.yaml");
        config.hot_config.smart = dir.path().join("smart_addresses.yaml");
        config.engine.profit_csv = dir.path().join("profit.csv");
        config
    }

    #[tokio::test]
    async fn test_lifecycle_pause_resume_stop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::with_executor(config(&dir), Arc::new(NoTrades)).unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);

        engine.start_with_feeds(vec![Arc::new(IdleFeed)]).await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        engine.pause();
        assert_eq!(engine.state(), EngineState::Paused);
        engine.resume();
        assert_eq!(engine.state(), EngineState::Running);

        engine.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
