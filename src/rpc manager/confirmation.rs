//! Signature confirmation and realized trade deltas

use super::rpc_errors::RelayError;
use crate::metrics::{metrics, Timer};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcTransactionConfig;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{
    option_serializer::OptionSerializer, UiTransactionEncoding, UiTransactionTokenBalance,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(8);

/// What a confirmed transaction did to the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOutcome {
    pub signature: Signature,
    pub slot: u64,
    /// Fee payer lamport change, fees included
    pub sol_delta: i64,
    /// Wallet-owned balance change of the traded mint, raw units
    pub token_delta: i128,
}

/// One row of a pre/post token balance table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceRow {
    pub owner: String,
    pub mint: String,
    pub amount: u128,
}

impl TokenBalanceRow {
    fn from_ui(balance: &UiTransactionTokenBalance) -> Option<Self> {
        let owner = match &balance.owner {
            OptionSerializer::Some(owner) => owner.clone(),
            _ => return None,
        };
        Some(Self {
            owner,
            mint: balance.mint.clone(),
            amount: balance.ui_token_amount.amount.parse().ok()?,
        })
    }
}

fn rows(balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>) -> Vec<TokenBalanceRow> {
    match balances {
        OptionSerializer::Some(list) => list.iter().filter_map(TokenBalanceRow::from_ui).collect(),
        _ => Vec::new(),
    }
}

/// Net change of `mint` held by `owner` across all of its token accounts
pub fn token_delta(
    pre: &[TokenBalanceRow],
    post: &[TokenBalanceRow],
    owner: &Pubkey,
    mint: &Pubkey,
) -> i128 {
    let owner = owner.to_string();
    let mint = mint.to_string();
    let total = |rows: &[TokenBalanceRow]| -> i128 {
        rows.iter()
            .filter(|r| r.owner == owner && r.mint == mint)
            .map(|r| r.amount as i128)
            .sum()
    };
    total(post) - total(pre)
}

/// Lamport change of the account at `index`
pub fn sol_delta(pre: &[u64], post: &[u64], index: usize) -> i64 {
    match (pre.get(index), post.get(index)) {
        (Some(&pre), Some(&post)) => (post as i128 - pre as i128) as i64,
        _ => 0,
    }
}

fn transaction_config() -> RpcTransactionConfig {
    RpcTransactionConfig {
        encoding: Some(UiTransactionEncoding::Json),
        commitment: Some(CommitmentConfig::confirmed()),
        max_supported_transaction_version: Some(0),
    }
}

pub struct ConfirmationWaiter {
    rpc: Arc<RpcClient>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ConfirmationWaiter {
    pub fn new(rpc: Arc<RpcClient>, timeout: Duration) -> Self {
        Self {
            rpc,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll until the signature is confirmed; returns its slot
    pub async fn wait(&self, signature: &Signature) -> Result<u64, RelayError> {
        let deadline = Instant::now() + self.timeout;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let timer = Timer::new();

        loop {
            ticker.tick().await;
            if Instant::now() >= deadline {
                return Err(RelayError::ConfirmationTimeout {
                    signature: signature.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }

            let response = match self.rpc.get_signature_statuses(&[*signature]).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(sig = %signature, error = %e, "Status poll failed");
                    continue;
                }
            };
            let Some(Some(status)) = response.value.into_iter().next() else {
                continue;
            };
            if let Some(err) = status.err {
                return Err(RelayError::TransactionFailed {
                    signature: signature.to_string(),
                    message: err.to_string(),
                });
            }
            if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                timer.observe_duration(&metrics().confirmation_latency);
                return Ok(status.slot);
            }
        }
    }

    /// Fetch the confirmed transaction and compute the wallet deltas
    pub async fn outcome(
        &self,
        signature: &Signature,
        wallet: &Pubkey,
        mint: &Pubkey,
    ) -> Result<TradeOutcome, RelayError> {
        let endpoint = self.rpc.url();
        let rpc = self.rpc.as_ref();
        let url = endpoint.as_str();
        // the node may not serve the transaction for a moment after confirming it
        let strategy = FixedInterval::new(self.poll_interval).take(5);
        let tx = Retry::spawn(strategy, move || async move {
            rpc.get_transaction_with_config(signature, transaction_config())
                .await
                .map_err(|e| RelayError::from_client_error(e, url))
        })
        .await?;

        let meta = tx.transaction.meta.ok_or_else(|| RelayError::RpcResponse {
            endpoint: endpoint.clone(),
            message: format!("transaction {signature} has no status meta"),
            code: None,
        })?;
        if let Some(err) = meta.err {
            return Err(RelayError::TransactionFailed {
                signature: signature.to_string(),
                message: err.to_string(),
            });
        }

        Ok(TradeOutcome {
            signature: *signature,
            slot: tx.slot,
            sol_delta: sol_delta(&meta.pre_balances, &meta.post_balances, 0),
            token_delta: token_delta(
                &rows(&meta.pre_token_balances),
                &rows(&meta.post_token_balances),
                wallet,
                mint,
            ),
        })
    }

    /// Wait for confirmation then compute the outcome
    pub async fn wait_outcome(
        &self,
        signature: &Signature,
        wallet: &Pubkey,
        mint: &Pubkey,
    ) -> Result<TradeOutcome, RelayError> {
        self.wait(signature).await?;
        self.outcome(signature, wallet, mint).await
    }
}
