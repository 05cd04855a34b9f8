//! Plain RPC submission, no tip

use super::rpc_errors::RelayError;
use super::{sign_for_channel, RelayChannel};
use crate::tx_builder::TxTemplate;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    commitment_config::CommitmentLevel,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::VersionedTransaction,
};
use std::sync::Arc;

pub struct RpcChannel {
    rpc: Arc<RpcClient>,
}

impl RpcChannel {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    fn send_config() -> RpcSendTransactionConfig {
        RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(CommitmentLevel::Processed),
            max_retries: Some(0),
            ..Default::default()
        }
    }

    /// Submit an already signed versioned transaction (aggregator route)
    pub async fn send_versioned(&self, tx: &VersionedTransaction) -> Result<Signature, RelayError> {
        self.rpc
            .send_transaction_with_config(tx, Self::send_config())
            .await
            .map_err(|e| RelayError::from_client_error(e, &self.rpc.url()))
    }
}

#[async_trait]
impl RelayChannel for RpcChannel {
    fn name(&self) -> &str {
        "rpc"
    }

    fn tip_instruction(&self, _payer: &Pubkey, _tip_lamports: u64) -> Option<Instruction> {
        None
    }

    async fn send_transaction(
        &self,
        wallet: Arc<Keypair>,
        tip_lamports: u64,
        template: &TxTemplate,
    ) -> Result<Signature, RelayError> {
        let tx = sign_for_channel(self, &wallet, tip_lamports, template)?;
        self.rpc
            .send_transaction_with_config(&tx, Self::send_config())
            .await
            .map_err(|e| RelayError::from_client_error(e, &self.rpc.url()))
    }
}
