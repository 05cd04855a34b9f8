//! Durable nonce pool
//!
//! A fixed set of nonce accounts whose values are kept fresh by push
//! subscriptions plus a polling fallback. Only the buy path draws from it.

pub mod nonce_errors;
pub mod nonce_pool;
pub mod nonce_refresh;

pub use nonce_errors::{NonceError, NonceResult};
pub use nonce_pool::{decode_nonce_hash, NoncePool};
pub use nonce_refresh::{refresh_all, spawn_poll_worker, spawn_subscription_worker};
