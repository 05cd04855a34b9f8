//! Aggregator sell mirroring an scm buy

use super::errors::SessionError;
use super::executor::{Fill, Route, TradeExecutor};
use crate::metrics::metrics;
use crate::trigger::MirrorOrder;
use crate::types::WSOL_MINT;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Retry the swap up to `attempts` times; the first success wins
pub async fn mirror_sell(
    executor: &dyn TradeExecutor,
    order: MirrorOrder,
    tip_lamports: u64,
    slippage_bps: u16,
    attempts: u32,
    cancel: &CancellationToken,
) -> Result<Fill, SessionError> {
    let route = Route::Aggregator {
        input_mint: order.token,
        output_mint: WSOL_MINT,
        amount: order.amount,
        slippage_bps,
    };
    let attempts = attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            r = executor.execute(route.clone(), tip_lamports) => r,
        };
        match result {
            Ok(fill) => {
                metrics().record_sell(true);
                info!(
                    token = %order.token,
                    trigger = %order.trigger_signature,
                    signature = %fill.signature,
                    attempt,
                    "Mirror sell confirmed"
                );
                return Ok(fill);
            }
            Err(SessionError::DryRun) => return Err(SessionError::DryRun),
            Err(e) => {
                metrics().sell_failures.inc();
                warn!(token = %order.token, attempt, error = %e, "Mirror sell failed");
                last = e.to_string();
            }
        }
    }

    metrics().record_sell(false);
    Err(SessionError::SellExhausted {
        token: order.token,
        attempts,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Signature;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` swaps
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TradeExecutor for Flaky {
        fn wallet(&self) -> Pubkey {
            Pubkey::default()
        }

        async fn execute(&self, route: Route, _tip: u64) -> Result<Fill, SessionError> {
            assert!(matches!(route, Route::Aggregator { output_mint, .. } if output_mint == WSOL_MINT));
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SessionError::NoBlockhash);
            }
            Ok(Fill {
                signature: Signature::new_unique(),
                slot: 1,
                sol_delta: 10,
                token_delta: -5,
                channel: "aggregator".into(),
            })
        }

        async fn token_balance(&self, _mint: &Pubkey) -> Result<u64, SessionError> {
            Ok(0)
        }
    }

    fn order() -> MirrorOrder {
        MirrorOrder {
            token: Pubkey::new_unique(),
            amount: 5,
            trigger_signature: Signature::new_unique(),
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let executor = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let fill = mirror_sell(&executor, order(), 0, 10_000, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fill.token_delta, -5);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let executor = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let err = mirror_sell(&executor, order(), 0, 10_000, 4, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SellExhausted { attempts: 4, .. }));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
    }
}
