//! Transaction building for the four tradeable venues
//!
//! ## Architecture
//!
//! - **context**: the per-order `TxContext` the session fills
//! - **venue**: the `VenueAdapter` contract, dispatch by venue tag and the
//!   shared token-account helpers
//! - **pump_fun**, **pump_amm**, **meteora_dbc**, **raydium_launchpad**:
//!   one adapter per venue
//! - **instructions**: durable-nonce planning and ordering validation
//! - **template**: the unsigned template each relay channel tips and signs
//!
//! Adapters never sign and never touch the nonce. The session selects an
//! adapter purely by venue tag:
//!
//! ```no_run
//! use curve_sniper::tx_builder::{Freshness, TxContext, TxTemplate};
//! # fn example(ctx: TxContext, hash: solana_sdk::hash::Hash) -> Result<(), curve_sniper::tx_builder::TxBuildError> {
//! let template = TxTemplate::build(&ctx, Freshness::Blockhash(hash))?;
//! # let _ = template;
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub use errors::TxBuildError;

mod context;
pub mod instructions;
pub mod meteora_dbc;
pub mod pump_amm;
pub mod pump_fun;
pub mod raydium_launchpad;
mod template;
pub mod venue;

pub use context::TxContext;
pub use instructions::{plan_instructions, sanity_check_ix_order, InstructionPlan};
pub use template::{Freshness, TxTemplate};
pub use venue::{adapter_for, build_for_context, VenueAdapter};
