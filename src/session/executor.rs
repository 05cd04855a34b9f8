//! Trade execution seam
//!
//! Sessions talk to the chain only through `TradeExecutor`, so the state
//! machine can be driven by a scripted executor in tests. `ChainExecutor` is
//! the live implementation: build the template, race it across the relay
//! channels, then wait for the confirmed outcome.

use super::errors::SessionError;
use crate::metrics::{metrics, Timer};
use crate::nonce_manager::NoncePool;
use crate::rpc_manager::{AggregatorRoute, BlockhashCache, ConfirmationWaiter, RelayError, RelayRacer};
use crate::tx_builder::{venue, Freshness, TxContext, TxTemplate};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, info};

const BALANCE_RETRY_INTERVAL: Duration = Duration::from_millis(200);
const BALANCE_RETRIES: usize = 3;

/// Where an order goes
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Direct venue swap built by the matching adapter
    Venue(TxContext),
    /// Generic aggregator swap
    Aggregator {
        input_mint: Pubkey,
        output_mint: Pubkey,
        amount: u64,
        slippage_bps: u16,
    },
}

impl Route {
    /// Mint whose wallet balance the outcome is measured on
    pub fn token_mint(&self) -> Pubkey {
        match self {
            Self::Venue(ctx) => ctx.token_mint(),
            Self::Aggregator {
                input_mint,
                output_mint,
                ..
            } => {
                if crate::types::is_quote_mint(input_mint) {
                    *output_mint
                } else {
                    *input_mint
                }
            }
        }
    }
}

/// Confirmed result of one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub signature: Signature,
    pub slot: u64,
    /// Fee payer lamport change, fees included
    pub sol_delta: i64,
    /// Wallet token balance change
    pub token_delta: i128,
    pub channel: String,
}

#[async_trait]
pub trait TradeExecutor: Send + Sync {
    fn wallet(&self) -> Pubkey;

    /// Submit and wait for confirmation
    async fn execute(&self, route: Route, tip_lamports: u64) -> Result<Fill, SessionError>;

    /// Authoritative token balance of the wallet, zero when the account is gone
    async fn token_balance(&self, mint: &Pubkey) -> Result<u64, SessionError>;
}

pub struct ChainExecutor {
    wallet: Arc<Keypair>,
    rpc: Arc<RpcClient>,
    racer: Arc<RelayRacer>,
    confirm: Arc<ConfirmationWaiter>,
    nonces: Arc<NoncePool>,
    blockhash: Arc<BlockhashCache>,
    aggregator: Arc<dyn AggregatorRoute>,
    dry_run: bool,
}

impl ChainExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallet: Arc<Keypair>,
        rpc: Arc<RpcClient>,
        racer: Arc<RelayRacer>,
        confirm: Arc<ConfirmationWaiter>,
        nonces: Arc<NoncePool>,
        blockhash: Arc<BlockhashCache>,
        aggregator: Arc<dyn AggregatorRoute>,
        dry_run: bool,
    ) -> Self {
        Self {
            wallet,
            rpc,
            racer,
            confirm,
            nonces,
            blockhash,
            aggregator,
            dry_run,
        }
    }

    /// Buys draw a durable nonce when one is ready; sells use the block hash
    fn freshness(&self, ctx: &TxContext) -> Result<Freshness, SessionError> {
        if ctx.is_buy() {
            if let Some((account, hash)) = self.nonces.next() {
                return Ok(Freshness::Nonce {
                    account,
                    authority: self.nonces.authority(),
                    hash,
                });
            }
            debug!("No nonce ready, falling back to the block hash");
        }
        self.blockhash
            .get()
            .map(Freshness::Blockhash)
            .ok_or(SessionError::NoBlockhash)
    }

    async fn execute_venue(&self, ctx: TxContext, tip_lamports: u64) -> Result<Fill, SessionError> {
        let mint = ctx.token_mint();
        let build_timer = Timer::new();
        let freshness = self.freshness(&ctx)?;
        let template = TxTemplate::build(&ctx, freshness)?;
        build_timer.observe_duration(&metrics().build_latency);

        if self.dry_run {
            info!(
                token = %mint,
                buy = ctx.is_buy(),
                amount = ctx.max_amount_in,
                instructions = template.plan.instructions.len(),
                "Dry run, not submitting"
            );
            return Err(SessionError::DryRun);
        }

        let raced = self
            .racer
            .race(Arc::clone(&self.wallet), tip_lamports, Arc::new(template))
            .await;
        if let Some(account) = freshness.nonce_account() {
            // a landed or in-flight transaction may have advanced it
            self.nonces.invalidate(&account);
        }
        let win = raced?;
        self.confirm_fill(win.signature, win.channel, &mint).await
    }

    async fn execute_aggregator(
        &self,
        input_mint: Pubkey,
        output_mint: Pubkey,
        amount: u64,
        slippage_bps: u16,
        tip_lamports: u64,
    ) -> Result<Fill, SessionError> {
        if self.dry_run {
            info!(input = %input_mint, output = %output_mint, amount, "Dry run, skipping aggregator swap");
            return Err(SessionError::DryRun);
        }
        let signature = self
            .aggregator
            .swap(
                Arc::clone(&self.wallet),
                &input_mint,
                &output_mint,
                amount,
                slippage_bps,
                tip_lamports,
            )
            .await?;
        let mint = if crate::types::is_quote_mint(&input_mint) {
            output_mint
        } else {
            input_mint
        };
        self.confirm_fill(signature, self.aggregator.name().to_string(), &mint)
            .await
    }

    async fn confirm_fill(
        &self,
        signature: Signature,
        channel: String,
        mint: &Pubkey,
    ) -> Result<Fill, SessionError> {
        let timer = Timer::new();
        let outcome = self
            .confirm
            .wait_outcome(&signature, &self.wallet.pubkey(), mint)
            .await?;
        timer.observe_duration(&metrics().confirmation_latency);
        Ok(Fill {
            signature: outcome.signature,
            slot: outcome.slot,
            sol_delta: outcome.sol_delta,
            token_delta: outcome.token_delta,
            channel,
        })
    }
}

#[async_trait]
impl TradeExecutor for ChainExecutor {
    fn wallet(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    async fn execute(&self, route: Route, tip_lamports: u64) -> Result<Fill, SessionError> {
        match route {
            Route::Venue(ctx) => self.execute_venue(ctx, tip_lamports).await,
            Route::Aggregator {
                input_mint,
                output_mint,
                amount,
                slippage_bps,
            } => {
                self.execute_aggregator(input_mint, output_mint, amount, slippage_bps, tip_lamports)
                    .await
            }
        }
    }

    async fn token_balance(&self, mint: &Pubkey) -> Result<u64, SessionError> {
        let ata = venue::ata(&self.wallet.pubkey(), mint);
        let rpc = self.rpc.as_ref();
        let endpoint = rpc.url();
        let url = endpoint.as_str();
        let ata = &ata;
        let strategy = FixedInterval::new(BALANCE_RETRY_INTERVAL).take(BALANCE_RETRIES);
        let balance = Retry::spawn(strategy, move || async move {
            match rpc.get_token_account_balance(ata).await {
                Ok(amount) => amount.amount.parse::<u64>().map_err(|e| RelayError::RpcResponse {
                    endpoint: url.to_string(),
                    message: format!("unparseable token amount: {e}"),
                    code: None,
                }),
                Err(e) if is_missing_account(&e.to_string()) => Ok(0),
                Err(e) => Err(RelayError::from_client_error(e, url)),
            }
        })
        .await?;
        Ok(balance)
    }
}

fn is_missing_account(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("could not find account") || lower.contains("account not found")
}
