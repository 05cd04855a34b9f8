//! Slow generic swap route used when every direct sell attempt failed
//!
//! The aggregator returns a complete unsigned versioned transaction. It is
//! signed locally and sent over plain RPC; the aggregator's own tip field
//! carries the inclusion tip.

use super::rpc_channel::RpcChannel;
use super::rpc_errors::RelayError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use governor::{DefaultDirectRateLimiter, Quota};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://lite-api.jup.ag/swap/v1";

/// Aggregator swap as an opaque service
#[async_trait]
pub trait AggregatorRoute: Send + Sync {
    fn name(&self) -> &str;

    /// Quote, build, sign and submit `amount` of `input_mint` into `output_mint`
    async fn swap(
        &self,
        wallet: Arc<Keypair>,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        tip_lamports: u64,
    ) -> Result<Signature, RelayError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    #[serde(default)]
    swap_transaction: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct JupiterRoute {
    client: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    rpc: Arc<RpcChannel>,
}

impl JupiterRoute {
    pub fn new(
        base_url: impl Into<String>,
        requests_per_second: u32,
        timeout: Duration,
        rpc: Arc<RpcChannel>,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: DefaultDirectRateLimiter::direct(Quota::per_second(rate)),
            rpc,
        })
    }

    /// Raw quote object, passed back verbatim to `/swap`
    pub async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Value, RelayError> {
        self.limiter.until_ready().await;
        let url = format!("{}/quote", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
                ("maxAccounts", "60".to_string()),
            ])
            .send()
            .await
            .map_err(|e| RelayError::from_http_error(e, &url))?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RelayError::RateLimitExceeded { endpoint: url });
        }
        let quote: Value = response
            .json()
            .await
            .map_err(|e| RelayError::from_http_error(e, &url))?;
        if let Some(err) = quote.get("error").and_then(Value::as_str) {
            if !err.is_empty() {
                return Err(RelayError::RpcResponse {
                    endpoint: url,
                    message: err.to_string(),
                    code: Some(status.as_u16() as i64),
                });
            }
        }
        if !status.is_success() {
            return Err(RelayError::RpcResponse {
                endpoint: url,
                message: format!("quote failed with status {status}"),
                code: Some(status.as_u16() as i64),
            });
        }
        Ok(quote)
    }

    /// Quote and build, then sign locally
    pub async fn prepare(
        &self,
        wallet: &Keypair,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        tip_lamports: u64,
    ) -> Result<VersionedTransaction, RelayError> {
        let quote = self
            .quote(input_mint, output_mint, amount, slippage_bps)
            .await?;
        let out_amount = quote
            .get("outAmount")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("?");
        debug!(
            input = %input_mint,
            output = %output_mint,
            out_amount,
            "Aggregator quote"
        );

        self.limiter.until_ready().await;
        let url = format!("{}/swap", self.base_url);
        let body = json!({
            "quoteResponse": quote,
            "userPublicKey": wallet.pubkey().to_string(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": { "jitoTipLamports": tip_lamports },
        });
        let response: SwapResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::from_http_error(e, &url))?
            .json()
            .await
            .map_err(|e| RelayError::from_http_error(e, &url))?;
        if let Some(err) = response.error.filter(|e| !e.is_empty()) {
            return Err(RelayError::RpcResponse {
                endpoint: url,
                message: err,
                code: None,
            });
        }

        let bytes = BASE64
            .decode(response.swap_transaction.as_bytes())
            .map_err(|e| RelayError::RpcResponse {
                endpoint: url.clone(),
                message: format!("swap transaction is not base64: {e}"),
                code: None,
            })?;
        let unsigned: VersionedTransaction =
            bincode::deserialize(&bytes).map_err(|e| RelayError::RpcResponse {
                endpoint: url.clone(),
                message: format!("swap transaction does not decode: {e}"),
                code: None,
            })?;
        VersionedTransaction::try_new(unsigned.message, &[wallet])
            .map_err(|e| RelayError::Configuration(format!("signing aggregator swap: {e}")))
    }
}

#[async_trait]
impl AggregatorRoute for JupiterRoute {
    fn name(&self) -> &str {
        "jupiter"
    }

    async fn swap(
        &self,
        wallet: Arc<Keypair>,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        tip_lamports: u64,
    ) -> Result<Signature, RelayError> {
        let tx = self
            .prepare(
                &wallet,
                input_mint,
                output_mint,
                amount,
                slippage_bps,
                tip_lamports,
            )
            .await?;
        let signature = self.rpc.send_versioned(&tx).await?;
        info!(sig = %signature, input = %input_mint, amount, "Aggregator swap submitted");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_client::nonblocking::rpc_client::RpcClient;
    use solana_sdk::{
        hash::Hash, message::Message, message::VersionedMessage, system_instruction,
    };

    fn route(url: String) -> JupiterRoute {
        let rpc = Arc::new(RpcChannel::new(Arc::new(RpcClient::new(
            "http://127.0.0.1:1".to_string(),
        ))));
        JupiterRoute::new(url, 10, Duration::from_secs(2), rpc).unwrap()
    }

    fn unsigned_swap(payer: &Pubkey) -> String {
        let ix = system_instruction::transfer(payer, &Pubkey::new_unique(), 1);
        let mut message = Message::new(&[ix], Some(payer));
        message.recent_blockhash = Hash::new_unique();
        let tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(message),
        };
        BASE64.encode(bincode::serialize(&tx).unwrap())
    }

    #[tokio::test]
    async fn test_prepare_signs_returned_transaction() {
        let wallet = Keypair::new();
        let mint = Pubkey::new_unique();
        let mut server = mockito::Server::new_async().await;
        let _quote = server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("amount".into(), "1000".into()),
                mockito::Matcher::UrlEncoded("slippageBps".into(), "20000".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"inputMint":"x","outAmount":"55","routePlan":[]}"#)
            .create_async()
            .await;
        let _swap = server
            .mock("POST", "/swap")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"prioritizationFeeLamports":{"jitoTipLamports":1000000}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(format!(
                r#"{{"swapTransaction":"{}","lastValidBlockHeight":1}}"#,
                unsigned_swap(&wallet.pubkey())
            ))
            .create_async()
            .await;

        let route = route(server.url());
        let tx = route
            .prepare(&wallet, &mint, &spl_token::native_mint::id(), 1_000, 20_000, 1_000_000)
            .await
            .unwrap();
        assert_ne!(tx.signatures[0], Signature::default());
        assert!(tx.verify_with_results().iter().all(|ok| *ok));
    }

    #[tokio::test]
    async fn test_quote_error_field_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _quote = server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"No routes found"}"#)
            .create_async()
            .await;
        let route = route(server.url());
        let err = route
            .quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RpcResponse { ref message, .. } if message == "No routes found"));
    }
}
