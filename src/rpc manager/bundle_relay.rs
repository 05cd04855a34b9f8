//! Block-engine bundle submission
//!
//! A bundle of one: the signed transaction with the tip transfer as its last
//! instruction, sent base58-encoded through `sendBundle` to every configured
//! block engine at once.

use super::http_relay::{first_success, post_json_rpc};
use super::rpc_errors::RelayError;
use super::{primary_signature, random_tip, sign_for_channel, RelayChannel};
use crate::tx_builder::TxTemplate;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use solana_sdk::{
    instruction::Instruction,
    pubkey,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default tip accounts published by the block engine
pub const DEFAULT_TIP_ACCOUNTS: [Pubkey; 8] = [
    pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"),
    pubkey!("HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe"),
    pubkey!("Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY"),
    pubkey!("ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49"),
    pubkey!("DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh"),
    pubkey!("ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt"),
    pubkey!("DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL"),
    pubkey!("3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT"),
];

pub struct BundleRelay {
    client: reqwest::Client,
    endpoints: Vec<String>,
    tip_accounts: Vec<Pubkey>,
}

impl BundleRelay {
    pub fn new(
        endpoints: Vec<String>,
        tip_accounts: Vec<Pubkey>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;
        let tip_accounts = if tip_accounts.is_empty() {
            DEFAULT_TIP_ACCOUNTS.to_vec()
        } else {
            tip_accounts
        };
        Ok(Self {
            client,
            endpoints,
            tip_accounts,
        })
    }

    async fn submit(&self, endpoint: &str, encoded: &str) -> Result<String, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [[encoded]],
        });
        let result = post_json_rpc(self.client.post(endpoint), endpoint, &body).await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl RelayChannel for BundleRelay {
    fn name(&self) -> &str {
        "bundle"
    }

    fn tip_instruction(&self, payer: &Pubkey, tip_lamports: u64) -> Option<Instruction> {
        random_tip(payer, &self.tip_accounts, tip_lamports)
    }

    async fn send_transaction(
        &self,
        wallet: Arc<Keypair>,
        tip_lamports: u64,
        template: &TxTemplate,
    ) -> Result<Signature, RelayError> {
        let tx = sign_for_channel(self, &wallet, tip_lamports, template)?;
        let bytes = bincode::serialize(&tx).map_err(|e| RelayError::Configuration(e.to_string()))?;
        let encoded = bs58::encode(bytes).into_string();

        let attempts = self
            .endpoints
            .iter()
            .map(|endpoint| self.submit(endpoint, &encoded).boxed())
            .collect();
        let bundle_id = first_success(attempts).await?;
        let signature = primary_signature(&tx);
        debug!(sig = %signature, bundle_id = %bundle_id, "Bundle accepted");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::InstructionPlan;
    use solana_sdk::{hash::Hash, signature::Signer, system_instruction};

    #[test]
    fn test_default_tip_accounts_used_when_unset() {
        let relay = BundleRelay::new(vec![], vec![], Duration::from_secs(1)).unwrap();
        let payer = Pubkey::new_unique();
        let tip = relay.tip_instruction(&payer, 10_000).unwrap();
        assert!(DEFAULT_TIP_ACCOUNTS.contains(&tip.accounts[1].pubkey));
    }

    #[tokio::test]
    async fn test_send_bundle_encodes_base58() {
        let wallet = Arc::new(Keypair::new());
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/bundles")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"sendBundle"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"bundle-1"}"#)
            .create_async()
            .await;

        let relay = BundleRelay::new(
            vec![format!("{}/api/v1/bundles", server.url())],
            vec![],
            Duration::from_secs(2),
        )
        .unwrap();
        let ix = system_instruction::transfer(&wallet.pubkey(), &Pubkey::new_unique(), 1);
        let template = TxTemplate::from_plan(
            wallet.pubkey(),
            InstructionPlan::new(vec![ix], false),
            Hash::new_unique(),
        );
        let sig = relay
            .send_transaction(wallet.clone(), 5_000, &template)
            .await
            .unwrap();
        assert_ne!(sig, Signature::default());
        mock.assert_async().await;
    }
}
