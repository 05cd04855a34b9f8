//! Concurrent submission across every relay channel
//!
//! Each channel runs in its own task. The first acceptance wins and the
//! remaining tasks are left running detached; their outcome only feeds
//! metrics. The race fails when every channel has failed or the race
//! timeout elapses first.

use super::rpc_errors::RelayError;
use super::RelayChannel;
use crate::metrics::metrics;
use crate::tx_builder::TxTemplate;
use futures::stream::{FuturesUnordered, StreamExt};
use solana_sdk::signature::{Keypair, Signature};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Winning submission
#[derive(Debug, Clone)]
pub struct RaceWin {
    pub signature: Signature,
    pub channel: String,
    pub latency: Duration,
}

pub struct RelayRacer {
    channels: Vec<Arc<dyn RelayChannel>>,
    race_timeout: Duration,
}

impl RelayRacer {
    pub fn new(channels: Vec<Arc<dyn RelayChannel>>, race_timeout: Duration) -> Self {
        Self {
            channels,
            race_timeout,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Submit `template` on every channel and return the first acceptance
    pub async fn race(
        &self,
        wallet: Arc<Keypair>,
        tip_lamports: u64,
        template: Arc<TxTemplate>,
    ) -> Result<RaceWin, RelayError> {
        if self.channels.is_empty() {
            return Err(RelayError::Configuration(
                "no relay channels configured".to_string(),
            ));
        }

        let started = Instant::now();
        let mut pending = FuturesUnordered::new();
        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let wallet = Arc::clone(&wallet);
            let template = Arc::clone(&template);
            pending.push(tokio::spawn(async move {
                let result = channel
                    .send_transaction(wallet, tip_lamports, &template)
                    .await;
                (channel.name().to_string(), result)
            }));
        }

        let count = pending.len();
        let mut last: Option<RelayError> = None;
        let deadline = tokio::time::sleep(self.race_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = pending.next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((channel, Ok(signature))) => {
                            let latency = started.elapsed();
                            metrics().record_relay_win(&channel, latency.as_secs_f64());
                            info!(channel = %channel, sig = %signature, latency_ms = latency.as_millis() as u64, "Relay race won");
                            if !pending.is_empty() {
                                tokio::spawn(drain_losers(pending));
                            }
                            return Ok(RaceWin { signature, channel, latency });
                        }
                        Ok((channel, Err(e))) => {
                            metrics().record_relay_failure(&channel);
                            debug!(channel = %channel, error = %e, "Relay channel failed");
                            last = Some(e);
                        }
                        Err(join) => {
                            warn!(error = %join, "Relay task aborted");
                            last = Some(RelayError::Transport {
                                endpoint: "relay task".to_string(),
                                message: join.to_string(),
                            });
                        }
                    }
                }
                _ = &mut deadline => {
                    tokio::spawn(drain_losers(pending));
                    return Err(RelayError::Timeout {
                        endpoint: "relay race".to_string(),
                        timeout_ms: self.race_timeout.as_millis() as u64,
                    });
                }
            }
        }

        Err(RelayError::AllChannelsFailed {
            count,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

type ChannelTask = tokio::task::JoinHandle<(String, Result<Signature, RelayError>)>;

async fn drain_losers(mut pending: FuturesUnordered<ChannelTask>) {
    while let Some(joined) = pending.next().await {
        if let Ok((channel, Err(e))) = joined {
            metrics().record_relay_failure(&channel);
            debug!(channel = %channel, error = %e, "Losing relay channel failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::InstructionPlan;
    use async_trait::async_trait;
    use solana_sdk::{
        hash::Hash, instruction::Instruction, pubkey::Pubkey, signature::Signer,
        system_instruction,
    };

    struct MockChannel {
        name: &'static str,
        delay: Duration,
        outcome: Result<Signature, RelayError>,
    }

    #[async_trait]
    impl RelayChannel for MockChannel {
        fn name(&self) -> &str {
            self.name
        }

        fn tip_instruction(&self, _payer: &Pubkey, _tip: u64) -> Option<Instruction> {
            None
        }

        async fn send_transaction(
            &self,
            _wallet: Arc<Keypair>,
            _tip: u64,
            _template: &TxTemplate,
        ) -> Result<Signature, RelayError> {
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    fn template(wallet: &Keypair) -> Arc<TxTemplate> {
        let ix = system_instruction::transfer(&wallet.pubkey(), &Pubkey::new_unique(), 1);
        Arc::new(TxTemplate::from_plan(
            wallet.pubkey(),
            InstructionPlan::new(vec![ix], false),
            Hash::new_unique(),
        ))
    }

    fn failing(name: &'static str, delay_ms: u64) -> Arc<dyn RelayChannel> {
        Arc::new(MockChannel {
            name,
            delay: Duration::from_millis(delay_ms),
            outcome: Err(RelayError::Transport {
                endpoint: name.to_string(),
                message: "refused".to_string(),
            }),
        })
    }

    #[tokio::test]
    async fn test_only_middle_channel_succeeds() {
        let wallet = Arc::new(Keypair::new());
        let sig = Signature::new_unique();
        let racer = RelayRacer::new(
            vec![
                failing("one", 5),
                Arc::new(MockChannel {
                    name: "two",
                    delay: Duration::from_millis(20),
                    outcome: Ok(sig),
                }),
                failing("three", 1),
            ],
            Duration::from_secs(2),
        );
        let win = racer.race(wallet.clone(), 1_000, template(&wallet)).await.unwrap();
        assert_eq!(win.signature, sig);
        assert_eq!(win.channel, "two");
    }

    #[tokio::test]
    async fn test_does_not_wait_for_slow_losers() {
        let wallet = Arc::new(Keypair::new());
        let sig = Signature::new_unique();
        let racer = RelayRacer::new(
            vec![
                failing("slow", 5_000),
                Arc::new(MockChannel {
                    name: "fast",
                    delay: Duration::from_millis(1),
                    outcome: Ok(sig),
                }),
            ],
            Duration::from_secs(10),
        );
        let started = Instant::now();
        let win = racer.race(wallet.clone(), 0, template(&wallet)).await.unwrap();
        assert_eq!(win.channel, "fast");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_all_failing_reports_count() {
        let wallet = Arc::new(Keypair::new());
        let racer = RelayRacer::new(
            vec![failing("a", 1), failing("b", 2), failing("c", 3)],
            Duration::from_secs(2),
        );
        let err = racer.race(wallet.clone(), 0, template(&wallet)).await.unwrap_err();
        assert!(matches!(err, RelayError::AllChannelsFailed { count: 3, .. }));
    }

    #[tokio::test]
    async fn test_race_timeout() {
        let wallet = Arc::new(Keypair::new());
        let racer = RelayRacer::new(vec![failing("stuck", 10_000)], Duration::from_millis(20));
        let err = racer.race(wallet.clone(), 0, template(&wallet)).await.unwrap_err();
        assert!(matches!(err, RelayError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_no_channels_is_configuration_error() {
        let wallet = Arc::new(Keypair::new());
        let racer = RelayRacer::new(vec![], Duration::from_secs(1));
        let err = racer.race(wallet.clone(), 0, template(&wallet)).await.unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}
