//! Ingest: dedup, pool tracking and fan-out
//!
//! One ingest worker runs per feed. All of them share the deduper, so the
//! same swap arriving over redundant feeds is routed once. Routing uses
//! `try_send` only; a full downstream channel drops the event rather than
//! stalling the feed.

use crate::metrics::metrics;
use crate::sniffer::dedup::SignatureDeduper;
use crate::sniffer::pool_state::PoolRegistry;
use crate::types::{SwapEvent, WatchClass};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decides which watch classes an event belongs to
pub trait WatchFilter: Send + Sync {
    fn classify(&self, event: &SwapEvent) -> SmallVec<[WatchClass; 3]>;
}

#[derive(Clone)]
pub struct IngestRoutes {
    pub classes: Vec<(WatchClass, mpsc::Sender<Arc<SwapEvent>>)>,
    /// Every deduplicated event, for live sessions
    pub follow: mpsc::Sender<Arc<SwapEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Duplicate,
    Routed { classes: usize },
}

#[derive(Clone)]
pub struct Ingest {
    dedup: Arc<SignatureDeduper>,
    pools: Arc<PoolRegistry>,
    filter: Arc<dyn WatchFilter>,
    routes: IngestRoutes,
    paused: Arc<AtomicBool>,
}

impl Ingest {
    pub fn new(
        dedup: Arc<SignatureDeduper>,
        pools: Arc<PoolRegistry>,
        filter: Arc<dyn WatchFilter>,
        routes: IngestRoutes,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dedup,
            pools,
            filter,
            routes,
            paused,
        }
    }

    pub fn handle(&self, event: SwapEvent) -> IngestOutcome {
        // pool state follows every record, including duplicates
        self.pools.observe(&event);
        if !self.dedup.check_and_insert(event.signature.as_ref()) {
            metrics().events_duplicate.inc();
            return IngestOutcome::Duplicate;
        }
        let event = Arc::new(event);

        forward(&self.routes.follow, &event, "follow");

        if self.paused.load(Ordering::Acquire) {
            return IngestOutcome::Routed { classes: 0 };
        }
        let mut routed = 0;
        for class in self.filter.classify(&event) {
            if let Some((_, tx)) = self.routes.classes.iter().find(|(c, _)| *c == class) {
                if forward(tx, &event, "class") {
                    routed += 1;
                }
            }
        }
        IngestOutcome::Routed { classes: routed }
    }

    /// Drain one feed's channel until it closes or `cancel` fires
    pub async fn run(self, mut rx: mpsc::Receiver<SwapEvent>, cancel: CancellationToken) {
        info!("Ingest worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        self.handle(event);
                    }
                    None => break,
                },
            }
        }
        info!("Ingest worker stopped");
    }
}

fn forward(tx: &mpsc::Sender<Arc<SwapEvent>>, event: &Arc<SwapEvent>, route: &str) -> bool {
    match tx.try_send(Arc::clone(event)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(route, sig = %event.signature, "Downstream full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(route, "Downstream closed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::buy_event;
    use crate::types::{PoolData, PumpFunPool};
    use smallvec::smallvec;
    use solana_sdk::pubkey::Pubkey;

    struct AllMint;

    impl WatchFilter for AllMint {
        fn classify(&self, _event: &SwapEvent) -> SmallVec<[WatchClass; 3]> {
            smallvec![WatchClass::Mint]
        }
    }

    fn ingest(
        paused: bool,
    ) -> (
        Ingest,
        mpsc::Receiver<Arc<SwapEvent>>,
        mpsc::Receiver<Arc<SwapEvent>>,
    ) {
        let (mint_tx, mint_rx) = mpsc::channel(4);
        let (follow_tx, follow_rx) = mpsc::channel(4);
        let ingest = Ingest::new(
            Arc::new(SignatureDeduper::new(1_000, 0.001)),
            Arc::new(PoolRegistry::new()),
            Arc::new(AllMint),
            IngestRoutes {
                classes: vec![(WatchClass::Mint, mint_tx)],
                follow: follow_tx,
            },
            Arc::new(AtomicBool::new(paused)),
        );
        (ingest, mint_rx, follow_rx)
    }

    #[test]
    fn test_duplicate_signature_routed_once() {
        let (ingest, mut mint_rx, _follow) = ingest(false);
        let event = buy_event(Pubkey::new_unique(), Pubkey::new_unique(), 1, 1);
        assert_eq!(
            ingest.handle(event.clone()),
            IngestOutcome::Routed { classes: 1 }
        );
        assert_eq!(ingest.handle(event), IngestOutcome::Duplicate);
        assert!(mint_rx.try_recv().is_ok());
        assert!(mint_rx.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_still_updates_pool_state() {
        let (mint_tx, _mint_rx) = mpsc::channel(4);
        let (follow_tx, _follow_rx) = mpsc::channel(4);
        let pools = Arc::new(PoolRegistry::new());
        let ingest = Ingest::new(
            Arc::new(SignatureDeduper::new(1_000, 0.001)),
            Arc::clone(&pools),
            Arc::new(AllMint),
            IngestRoutes {
                classes: vec![(WatchClass::Mint, mint_tx)],
                follow: follow_tx,
            },
            Arc::new(AtomicBool::new(false)),
        );
        let curve = |virtual_sol_reserves| {
            PoolData::PumpFun(PumpFunPool {
                creator: Pubkey::default(),
                virtual_sol_reserves,
                virtual_token_reserves: 1_000_000_000_000_000,
                real_sol_reserves: 0,
                real_token_reserves: 800_000_000_000_000,
            })
        };
        let mint = Pubkey::new_unique();
        let mut first = buy_event(Pubkey::new_unique(), mint, 1, 1);
        first.pool = Some(curve(30_000_000_000));
        let mut again = first.clone();
        again.pool = Some(curve(60_000_000_000));

        assert_eq!(ingest.handle(first), IngestOutcome::Routed { classes: 1 });
        assert_eq!(ingest.handle(again), IngestOutcome::Duplicate);
        let PoolData::PumpFun(latest) = pools.get(&mint).unwrap().pool() else {
            panic!("curve pool expected");
        };
        assert_eq!(latest.virtual_sol_reserves, 60_000_000_000);
    }

    #[test]
    fn test_paused_still_feeds_sessions() {
        let (ingest, mut mint_rx, mut follow_rx) = ingest(true);
        let event = buy_event(Pubkey::new_unique(), Pubkey::new_unique(), 1, 1);
        assert_eq!(ingest.handle(event), IngestOutcome::Routed { classes: 0 });
        assert!(mint_rx.try_recv().is_err());
        assert!(follow_rx.try_recv().is_ok());
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (ingest, _mint_rx, _follow) = ingest(false);
        for _ in 0..4 {
            ingest.handle(buy_event(Pubkey::new_unique(), Pubkey::new_unique(), 1, 1));
        }
        let outcome = ingest.handle(buy_event(Pubkey::new_unique(), Pubkey::new_unique(), 1, 1));
        assert_eq!(outcome, IngestOutcome::Routed { classes: 0 });
    }

    #[tokio::test]
    async fn test_run_stops_when_feed_closes() {
        let (ingest, mut mint_rx, _follow) = ingest(false);
        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(ingest.run(rx, CancellationToken::new()));
        tx.send(buy_event(Pubkey::new_unique(), Pubkey::new_unique(), 1, 1))
            .await
            .unwrap();
        drop(tx);
        worker.await.unwrap();
        assert!(mint_rx.try_recv().is_ok());
    }
}
