//! JSON-RPC `sendTransaction` over HTTP to one or more paid relays

use super::rpc_errors::RelayError;
use super::{primary_signature, random_tip, sign_for_channel, RelayChannel};
use crate::tx_builder::TxTemplate;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::{select_ok, BoxFuture};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: Option<i64>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// POST a JSON-RPC body and return its `result`
pub(crate) async fn post_json_rpc(
    request: reqwest::RequestBuilder,
    endpoint: &str,
    body: &Value,
) -> Result<Value, RelayError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| RelayError::from_http_error(e, endpoint))?;
    if response.status().as_u16() == 429 {
        return Err(RelayError::RateLimitExceeded {
            endpoint: endpoint.to_string(),
        });
    }
    let parsed: JsonRpcResponse = response
        .json()
        .await
        .map_err(|e| RelayError::from_http_error(e, endpoint))?;
    match (parsed.result, parsed.error) {
        (_, Some(err)) => Err(RelayError::RpcResponse {
            endpoint: endpoint.to_string(),
            message: err.message,
            code: err.code,
        }),
        (Some(result), None) => Ok(result),
        (None, None) => Err(RelayError::RpcResponse {
            endpoint: endpoint.to_string(),
            message: "empty response".to_string(),
            code: None,
        }),
    }
}

/// First success across `attempts`; the last error when all fail
pub(crate) async fn first_success<T>(
    attempts: Vec<BoxFuture<'_, Result<T, RelayError>>>,
) -> Result<T, RelayError> {
    if attempts.is_empty() {
        return Err(RelayError::Configuration("no endpoints configured".to_string()));
    }
    select_ok(attempts).await.map(|(value, _rest)| value)
}

pub struct HttpRelay {
    name: String,
    client: reqwest::Client,
    urls: Vec<String>,
    api_key: Option<String>,
    tip_accounts: Vec<Pubkey>,
}

impl HttpRelay {
    pub fn new(
        name: impl Into<String>,
        urls: Vec<String>,
        api_key: Option<String>,
        tip_accounts: Vec<Pubkey>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            client,
            urls,
            api_key,
            tip_accounts,
        })
    }

    async fn submit(&self, url: &str, encoded: &str) -> Result<Signature, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendTransaction",
            "params": [encoded, {"encoding": "base64", "skipPreflight": true}],
        });
        let mut request = self.client.post(url);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        let result = post_json_rpc(request, url, &body).await?;
        result
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RelayError::RpcResponse {
                endpoint: url.to_string(),
                message: format!("unexpected result {result}"),
                code: None,
            })
    }
}

#[async_trait]
impl RelayChannel for HttpRelay {
    fn name(&self) -> &str {
        &self.name
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
        let encoded = BASE64.encode(bytes);
        let expected = primary_signature(&tx);

        let attempts = self
            .urls
            .iter()
            .map(|url| self.submit(url, &encoded).boxed())
            .collect();
        let accepted = first_success(attempts).await?;
        debug!(channel = %self.name, sig = %expected, echoed = %accepted, "HTTP relay accepted transaction");
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_manager::ProgramErrorKind;
    use crate::tx_builder::{InstructionPlan, TxTemplate};
    use solana_sdk::{hash::Hash, signature::Signer, system_instruction};

    fn template(wallet: &Keypair) -> TxTemplate {
        let ix = system_instruction::transfer(&wallet.pubkey(), &Pubkey::new_unique(), 1);
        TxTemplate::from_plan(
            wallet.pubkey(),
            InstructionPlan::new(vec![ix], false),
            Hash::new_unique(),
        )
    }

    #[tokio::test]
    async fn test_falls_through_to_healthy_url() {
        let wallet = Arc::new(Keypair::new());
        let mut bad = mockito::Server::new_async().await;
        let mut good = mockito::Server::new_async().await;
        let _bad = bad
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32002,"message":"custom program error: 0x1771"}}"#)
            .create_async()
            .await;
        let sig = Signature::new_unique();
        let _good = good
            .mock("POST", "/")
            .match_header("api-key", "secret")
            .with_status(200)
            .with_body(format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{sig}"}}"#))
            .create_async()
            .await;

        let relay = HttpRelay::new(
            "http",
            vec![bad.url(), good.url()],
            Some("secret".into()),
            vec![Pubkey::new_unique()],
            Duration::from_secs(2),
        )
        .unwrap();
        let tpl = template(&wallet);
        let got = relay.send_transaction(wallet.clone(), 1_000, &tpl).await.unwrap();
        let expected = tpl
            .sign(&wallet, &[relay.tip_instruction(&wallet.pubkey(), 1_000).unwrap()])
            .unwrap();
        // signature is deterministic for identical message and key
        assert_eq!(got, expected.signatures[0]);
    }

    #[tokio::test]
    async fn test_all_urls_failing_reports_error() {
        let wallet = Arc::new(Keypair::new());
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(429)
            .create_async()
            .await;
        let relay =
            HttpRelay::new("http", vec![server.url()], None, vec![], Duration::from_secs(2)).unwrap();
        let err = relay
            .send_transaction(wallet.clone(), 0, &template(&wallet))
            .await
            .unwrap_err();
        assert_eq!(err.program_error_kind(), ProgramErrorKind::RateLimited);
    }
}
