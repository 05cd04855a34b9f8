//! Wallet management module

use crate::config::WalletConfig;
use anyhow::{Context, Result};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Owns the trading keypair
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Keypair file path when configured, otherwise the base58 env var
    pub fn from_config(config: &WalletConfig) -> Result<Self> {
        match &config.keypair_path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(&config.private_key_env),
        }
    }

    /// Create a new wallet manager from a keypair file
    pub fn from_file(path: &str) -> Result<Self> {
        let keypair_bytes = Zeroizing::new(
            std::fs::read(path).with_context(|| format!("Failed to read keypair file: {}", path))?,
        );

        let keypair = if keypair_bytes.len() == 64 {
            keypair_from_bytes(&keypair_bytes)?
        } else {
            // JSON format
            let json: Zeroizing<Vec<u8>> = Zeroizing::new(
                serde_json::from_slice(&keypair_bytes).context("Failed to parse keypair JSON")?,
            );
            if json.len() != 64 {
                anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", json.len());
            }
            keypair_from_bytes(&json)?
        };

        Ok(Self::from_keypair(keypair))
    }

    /// Read a base58 secret key from the environment
    pub fn from_env(var: &str) -> Result<Self> {
        let encoded = Zeroizing::new(
            std::env::var(var).with_context(|| format!("Environment variable {} not set", var))?,
        );
        Self::from_base58(encoded.trim())
    }

    pub fn from_base58(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            bs58::decode(encoded)
                .into_vec()
                .context("Private key is not valid base58")?,
        );
        if bytes.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
        }
        Ok(Self::from_keypair(keypair_from_bytes(&bytes)?))
    }

    /// Create a new wallet manager from a keypair
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Get the public key
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Get an Arc reference to the keypair
    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

/// Last known SOL balance of the wallet. Zero means not yet known.
#[derive(Debug, Default)]
pub struct BalanceWatcher {
    lamports: AtomicU64,
}

impl BalanceWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(lamports: u64) -> Self {
        Self {
            lamports: AtomicU64::new(lamports),
        }
    }

    pub fn lamports(&self) -> u64 {
        self.lamports.load(Ordering::Acquire)
    }

    pub fn set(&self, lamports: u64) {
        self.lamports.store(lamports, Ordering::Release);
    }

    pub fn spawn_refresh_worker(
        self: Arc<Self>,
        rpc: Arc<RpcClient>,
        owner: Pubkey,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(owner = %owner, "Balance watcher started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match rpc.get_balance(&owner).await {
                        Ok(lamports) => self.set(lamports),
                        Err(e) => debug!(error = %e, "Balance refresh failed"),
                    },
                }
            }
            debug!("Balance watcher stopped");
        })
    }
}
