//! Freshest observed block hash, polled into an `ArcSwap`

use super::rpc_errors::RelayError;
use arc_swap::ArcSwapOption;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{commitment_config::CommitmentConfig, hash::Hash};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy)]
struct Observed {
    hash: Hash,
    at: Instant,
}

/// Single writer (the refresh worker), any number of lock-free readers
#[derive(Default)]
pub struct BlockhashCache {
    latest: ArcSwapOption<Observed>,
}

impl BlockhashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Hash> {
        self.latest.load().as_ref().map(|o| o.hash)
    }

    /// Time since the cached hash was observed
    pub fn age(&self) -> Option<Duration> {
        self.latest.load().as_ref().map(|o| o.at.elapsed())
    }

    pub fn set(&self, hash: Hash) {
        self.latest.store(Some(Arc::new(Observed {
            hash,
            at: Instant::now(),
        })));
    }

    pub async fn refresh(&self, rpc: &RpcClient) -> Result<Hash, RelayError> {
        let (hash, _last_valid) = rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::processed())
            .await
            .map_err(|e| RelayError::from_client_error(e, &rpc.url()))?;
        self.set(hash);
        Ok(hash)
    }

    /// Keep the cache fresh until `cancel` fires
    pub fn spawn_refresh_worker(
        self: Arc<Self>,
        rpc: Arc<RpcClient>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = interval.as_millis() as u64, "Blockhash refresher started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh(&rpc).await {
                            debug!(error = %e, "Blockhash refresh failed");
                        }
                    }
                }
            }
            info!("Blockhash refresher stopped");
        })
    }
}
