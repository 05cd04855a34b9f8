//! Curve sniper: latency-sensitive trading engine for bonding-curve and AMM pools
//!
//! The library exposes every component so the binary, the integration tests
//! and the benches share one build.

pub mod config;
pub mod endpoints;
pub mod hold_timer;
pub mod hot_config;
pub mod metrics;
pub mod monitor;
pub mod profit;
pub mod quote;
pub mod session;
pub mod sniffer;
pub mod structured_logging;
pub mod trigger;
pub mod tx_builder;
pub mod types;
pub mod wallet;

// Component modules with non-standard paths (directories with spaces)
#[path = "nonce manager/mod.rs"]
pub mod nonce_manager;

#[path = "rpc manager/mod.rs"]
pub mod rpc_manager;

// Re-export commonly used types
pub use monitor::Engine;
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
pub use types::{PoolData, SwapEvent, Venue, WatchClass};
