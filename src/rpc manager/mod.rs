//! Relay Manager Module
//!
//! Independent submission channels raced against each other, plus the
//! services around them: confirmation waiting, the block hash cache and the
//! aggregator fallback route.

use crate::tx_builder::{TxBuildError, TxTemplate};
use async_trait::async_trait;
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    system_instruction,
    transaction::Transaction,
};
use std::sync::Arc;

pub mod aggregator;
pub mod blockhash;
pub mod bundle_relay;
pub mod confirmation;
pub mod grpc_relay;
pub mod http_relay;
pub mod relay_racer;
pub mod rpc_channel;
pub mod rpc_errors;

pub use aggregator::{AggregatorRoute, JupiterRoute};
pub use blockhash::BlockhashCache;
pub use confirmation::{ConfirmationWaiter, TradeOutcome};
pub use relay_racer::{RaceWin, RelayRacer};
pub use rpc_errors::{ProgramErrorKind, RelayError};

/// One independent way of getting a transaction to a leader
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Short name for logs and metrics
    fn name(&self) -> &str;

    /// Tip transfer this channel requires, `None` for untipped channels
    fn tip_instruction(&self, payer: &Pubkey, tip_lamports: u64) -> Option<Instruction>;

    /// Tip, sign and submit the template. Returns the transaction signature.
    async fn send_transaction(
        &self,
        wallet: Arc<Keypair>,
        tip_lamports: u64,
        template: &TxTemplate,
    ) -> Result<Signature, RelayError>;
}

/// Transfer to a tip account chosen at random from `accounts`
pub fn random_tip(payer: &Pubkey, accounts: &[Pubkey], lamports: u64) -> Option<Instruction> {
    if accounts.is_empty() || lamports == 0 {
        return None;
    }
    let to = accounts[fastrand::usize(..accounts.len())];
    Some(system_instruction::transfer(payer, &to, lamports))
}

/// Sign the channel's own copy of the template with its tip appended
pub fn sign_for_channel(
    channel: &dyn RelayChannel,
    wallet: &Keypair,
    tip_lamports: u64,
    template: &TxTemplate,
) -> Result<Transaction, TxBuildError> {
    let tip: Vec<Instruction> = channel
        .tip_instruction(&template.payer, tip_lamports)
        .into_iter()
        .collect();
    template.sign(wallet, &tip)
}

/// First signature of a signed transaction
pub(crate) fn primary_signature(tx: &Transaction) -> Signature {
    tx.signatures.first().copied().unwrap_or_default()
}
