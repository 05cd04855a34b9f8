//! gRPC relay: unary `/serverpb.Server/SendTransaction`
//!
//! The service has no published crate, so the three messages it needs are
//! declared here with `prost` derives and the call goes through a raw
//! `tonic::client::Grpc` with the prost codec.

use super::http_relay::first_success;
use super::rpc_errors::RelayError;
use super::{primary_signature, random_tip, sign_for_channel, RelayChannel};
use crate::tx_builder::TxTemplate;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::FutureExt;
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use std::sync::Arc;
use std::time::Duration;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

const SEND_TRANSACTION_PATH: &str = "/serverpb.Server/SendTransaction";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionMessage {
    /// Base64 of the serialized transaction
    #[prost(string, tag = "1")]
    pub content: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendTransactionRequest {
    #[prost(message, optional, tag = "1")]
    pub transaction: Option<TransactionMessage>,
    #[prost(string, tag = "2")]
    pub mode: String,
    #[prost(bool, tag = "3")]
    pub revert_protection: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendTransactionResponse {
    #[prost(string, tag = "1")]
    pub signature: String,
}

impl SendTransactionRequest {
    pub fn fast(encoded_tx: String) -> Self {
        Self {
            transaction: Some(TransactionMessage {
                content: encoded_tx,
            }),
            mode: "fast".to_string(),
            revert_protection: true,
        }
    }
}

pub struct GrpcRelay {
    endpoints: Vec<(String, Channel)>,
    api_key: Option<MetadataValue<Ascii>>,
    tip_accounts: Vec<Pubkey>,
}

impl GrpcRelay {
    /// Channels connect lazily on first use
    pub fn new(
        urls: Vec<String>,
        api_key: Option<String>,
        tip_accounts: Vec<Pubkey>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let mut endpoints = Vec::with_capacity(urls.len());
        for url in urls {
            let mut endpoint = Endpoint::from_shared(url.clone())
                .map_err(|e| RelayError::Configuration(format!("{url}: {e}")))?
                .timeout(timeout)
                .tcp_nodelay(true);
            if url.starts_with("https://") {
                endpoint = endpoint
                    .tls_config(ClientTlsConfig::new().with_native_roots())
                    .map_err(|e| RelayError::Configuration(format!("{url}: {e}")))?;
            }
            endpoints.push((url, endpoint.connect_lazy()));
        }
        let api_key = api_key
            .map(|k| k.parse::<MetadataValue<Ascii>>())
            .transpose()
            .map_err(|e| RelayError::Configuration(format!("api key: {e}")))?;
        Ok(Self {
            endpoints,
            api_key,
            tip_accounts,
        })
    }

    async fn submit(
        &self,
        url: &str,
        channel: Channel,
        request: SendTransactionRequest,
    ) -> Result<String, RelayError> {
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|e| RelayError::Transport {
            endpoint: url.to_string(),
            message: e.to_string(),
        })?;

        let mut request = tonic::Request::new(request);
        if let Some(key) = &self.api_key {
            request.metadata_mut().insert("apikey", key.clone());
        }
        let codec: ProstCodec<SendTransactionRequest, SendTransactionResponse> =
            ProstCodec::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(SEND_TRANSACTION_PATH), codec)
            .await
            .map_err(|status| grpc_status_error(url, status))?;
        Ok(response.into_inner().signature)
    }
}

fn grpc_status_error(url: &str, status: tonic::Status) -> RelayError {
    match status.code() {
        tonic::Code::ResourceExhausted => RelayError::RateLimitExceeded {
            endpoint: url.to_string(),
        },
        tonic::Code::DeadlineExceeded => RelayError::Timeout {
            endpoint: url.to_string(),
            timeout_ms: 0,
        },
        tonic::Code::Unavailable => RelayError::Transport {
            endpoint: url.to_string(),
            message: status.message().to_string(),
        },
        code => RelayError::RpcResponse {
            endpoint: url.to_string(),
            message: status.message().to_string(),
            code: Some(code as i64),
        },
    }
}

#[async_trait]
impl RelayChannel for GrpcRelay {
    fn name(&self) -> &str {
        "grpc"
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
        let request = SendTransactionRequest::fast(BASE64.encode(bytes));

        let attempts = self
            .endpoints
            .iter()
            .map(|(url, channel)| self.submit(url, channel.clone(), request.clone()).boxed())
            .collect();
        let echoed = first_success(attempts).await?;
        let signature = primary_signature(&tx);
        debug!(sig = %signature, echoed = %echoed, "gRPC relay accepted transaction");
        Ok(signature)
    }
}
