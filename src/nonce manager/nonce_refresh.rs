//! Nonce refresh workers
//!
//! Push subscriptions are the primary source of fresh nonce values; a 1s poll
//! of all accounts backs them up when a socket drops.

use super::nonce_errors::{NonceError, NonceResult};
use super::nonce_pool::NoncePool;
use crate::sniffer::errors::ExponentialBackoff;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::StreamExt;
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::nonblocking::{pubsub_client::PubsubClient, rpc_client::RpcClient};
use solana_client::rpc_config::RpcAccountInfoConfig;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fetch every pool account once. Returns how many slots were refreshed.
pub async fn refresh_all(pool: &NoncePool, rpc: &RpcClient) -> NonceResult<usize> {
    let accounts: Vec<Pubkey> = pool.accounts().collect();
    if accounts.is_empty() {
        return Ok(0);
    }
    let fetched = rpc
        .get_multiple_accounts(&accounts)
        .await
        .map_err(|e| NonceError::from_client_error(e, Some(rpc.url())))?;

    let mut refreshed = 0;
    for (key, account) in accounts.iter().zip(fetched) {
        let result = match account {
            Some(account) => pool.update_from_data(key, &account.data).map(|_| ()),
            None => Err(NonceError::AccountNotFound(*key)),
        };
        match result {
            Ok(()) => refreshed += 1,
            Err(e) => debug!(nonce_account = %key, error = %e, "Nonce refresh skipped"),
        }
    }
    Ok(refreshed)
}

/// Poll all nonce accounts on `interval` until cancelled
pub fn spawn_poll_worker(
    pool: Arc<NoncePool>,
    rpc: Arc<RpcClient>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = refresh_all(&pool, &rpc).await {
                        warn!(error = %e, "Nonce poll failed");
                    }
                }
            }
        }
        debug!("Nonce poll worker stopped");
    })
}

/// Keep an `account_subscribe` stream open for one nonce account, reconnecting
/// with backoff until cancelled
pub fn spawn_subscription_worker(
    pool: Arc<NoncePool>,
    ws_url: String,
    account: Pubkey,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = ExponentialBackoff::new(200, 10_000);
        while !cancel.is_cancelled() {
            match subscribe_once(&pool, &ws_url, account, &cancel).await {
                Ok(()) => backoff.reset(),
                Err(e) => warn!(nonce_account = %account, error = %e, "Nonce subscription dropped"),
            }
            if cancel.is_cancelled() {
                break;
            }
            let delay = backoff.next_backoff();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(nonce_account = %account, "Nonce subscription worker stopped");
    })
}

async fn subscribe_once(
    pool: &NoncePool,
    ws_url: &str,
    account: Pubkey,
    cancel: &CancellationToken,
) -> NonceResult<()> {
    let sub_err = |e: &dyn std::fmt::Display| NonceError::Subscription {
        account,
        message: e.to_string(),
    };
    let client = PubsubClient::new(ws_url).await.map_err(|e| sub_err(&e))?;
    let (mut notifications, unsubscribe) = client
        .account_subscribe(
            &account,
            Some(RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::processed()),
                data_slice: None,
                min_context_slot: None,
            }),
        )
        .await
        .map_err(|e| sub_err(&e))?;
    info!(nonce_account = %account, "Nonce subscription open");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = notifications.next() => {
                let Some(response) = update else {
                    unsubscribe().await;
                    return Err(sub_err(&"stream ended"));
                };
                let data = match response.value.data {
                    UiAccountData::Binary(data, _) | UiAccountData::LegacyBinary(data) => {
                        BASE64.decode(data).unwrap_or_default()
                    }
                    UiAccountData::Json(_) => Vec::new(),
                };
                if let Err(e) = pool.update_from_data(&account, &data) {
                    debug!(nonce_account = %account, error = %e, "Undecodable nonce notification");
                }
            }
        }
    }
    unsubscribe().await;
    Ok(())
}
