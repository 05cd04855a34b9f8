//! Common types used throughout the engine
//!
//! `SwapEvent` is produced once by the sniffer and read everywhere else.
//! `PoolData` is the closed set of pool payloads the venue adapters know how
//! to trade against.

use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey, pubkey::Pubkey, signature::Signature};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Wrapped SOL mint, used as the quote side of every supported venue.
pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

/// USDC mint, accepted as an input asset by the smart-wallet trigger.
pub const USDC_MINT: Pubkey = pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

/// Token decimals assumed for launch-venue tokens when deriving display prices.
pub const TOKEN_DECIMALS_SCALE: f64 = 1e6;

/// Venue tag carried by every pool payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Venue {
    /// Bonding-curve launch venue
    PumpFun = 1,
    /// Constant-product AMM the bonding curve migrates into
    PumpAmm = 2,
    /// Generic aggregator route, only used as a sell fallback
    Aggregator = 3,
    /// Dynamic bonding curve priced by sqrt price
    MeteoraDbc = 4,
    /// Generic launchpad with virtual plus real reserves
    RaydiumLaunchpad = 5,
}

impl From<u8> for Venue {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::PumpFun,
            2 => Self::PumpAmm,
            4 => Self::MeteoraDbc,
            5 => Self::RaydiumLaunchpad,
            _ => Self::Aggregator,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PumpFun => "pump_fun",
            Self::PumpAmm => "pump_amm",
            Self::Aggregator => "aggregator",
            Self::MeteoraDbc => "meteora_dbc",
            Self::RaydiumLaunchpad => "raydium_launchpad",
        };
        f.write_str(name)
    }
}

/// Bonding-curve snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpFunPool {
    pub creator: Pubkey,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub real_token_reserves: u64,
}

/// Constant-product pool snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpAmmPool {
    pub pool: Pubkey,
    pub coin_creator: Pubkey,
    pub protocol_fee_recipient: Pubkey,
    /// Token side reserves
    pub base_reserves: u64,
    /// SOL side reserves
    pub quote_reserves: u64,
}

/// Dynamic bonding curve snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeteoraDbcPool {
    pub config: Pubkey,
    pub pool: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub token_base_program: Pubkey,
    pub next_sqrt_price: u128,
}

/// Launchpad snapshot, reserves are the real balances after the observed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchpadPool {
    pub pool_state: Pubkey,
    pub global_config: Pubkey,
    pub platform_config: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub real_base: u64,
    pub real_quote: u64,
}

/// Closed union over the pool payloads of the four tradeable venues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolData {
    PumpFun(PumpFunPool),
    PumpAmm(PumpAmmPool),
    MeteoraDbc(MeteoraDbcPool),
    RaydiumLaunchpad(LaunchpadPool),
}

impl PoolData {
    pub fn venue(&self) -> Venue {
        match self {
            Self::PumpFun(_) => Venue::PumpFun,
            Self::PumpAmm(_) => Venue::PumpAmm,
            Self::MeteoraDbc(_) => Venue::MeteoraDbc,
            Self::RaydiumLaunchpad(_) => Venue::RaydiumLaunchpad,
        }
    }

    /// Display price in SOL per million base units. Never used on the money path.
    ///
    /// The dynamic bonding curve reports its sqrt price verbatim.
    pub fn display_price(&self) -> f64 {
        match self {
            Self::PumpFun(p) => sol_per_token(p.real_sol_reserves, p.real_token_reserves),
            Self::PumpAmm(p) => sol_per_token(p.quote_reserves, p.base_reserves),
            Self::MeteoraDbc(p) => p.next_sqrt_price as f64,
            Self::RaydiumLaunchpad(p) => sol_per_token(p.real_quote, p.real_base),
        }
    }
}

fn sol_per_token(sol: u64, tokens: u64) -> f64 {
    if tokens == 0 {
        return 0.0;
    }
    sol as f64 / LAMPORTS_PER_SOL as f64 / tokens as f64 * TOKEN_DECIMALS_SCALE
}

/// Structural facts about a create instruction, supplied by the upstream parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateInstructionInfo {
    pub discriminator: [u8; 8],
    pub account_count: usize,
}

/// A parsed swap observed on chain. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapEvent {
    pub signature: Signature,
    pub signers: SmallVec<[Pubkey; 2]>,
    pub slot: u64,
    pub timestamp: DateTime<Utc>,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub input_amount: u64,
    pub output_amount: u64,
    pub pool: Option<PoolData>,
    /// Accounts the transaction touched that matched a watch filter
    pub matched_accounts: SmallVec<[Pubkey; 4]>,
    pub create_instruction: Option<CreateInstructionInfo>,
}

impl SwapEvent {
    pub fn primary_signer(&self) -> Option<&Pubkey> {
        self.signers.first()
    }

    pub fn is_signed_by(&self, key: &Pubkey) -> bool {
        self.signers.iter().any(|s| s == key)
    }

    /// SOL (or USDC) in, token out
    pub fn is_buy(&self) -> bool {
        is_quote_mint(&self.input_mint) && !is_quote_mint(&self.output_mint)
    }

    /// Token in, SOL out
    pub fn is_sell(&self) -> bool {
        self.output_mint == WSOL_MINT
    }

    /// The non-quote side of the trade
    pub fn token_mint(&self) -> Pubkey {
        if is_quote_mint(&self.input_mint) {
            self.output_mint
        } else {
            self.input_mint
        }
    }

    pub fn venue(&self) -> Option<Venue> {
        self.pool.as_ref().map(PoolData::venue)
    }
}

pub fn is_quote_mint(mint: &Pubkey) -> bool {
    *mint == WSOL_MINT || *mint == USDC_MINT
}

/// Watch class a trigger belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchClass {
    Mint,
    Smart,
    Scm,
}

impl fmt::Display for WatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mint => f.write_str("mint"),
            Self::Smart => f.write_str("smart"),
            Self::Scm => f.write_str("scm"),
        }
    }
}

/// Display-only `f64` shared between tasks, stored as its bit pattern
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}
