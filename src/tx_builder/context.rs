//! Shared transaction context handed to every venue adapter
//!
//! The session fills one `TxContext` per order. Adapters read it, never
//! mutate it, and never see the signer's keypair: building and signing are
//! separate steps.

use crate::types::{PoolData, WSOL_MINT};
use solana_sdk::pubkey::Pubkey;

/// Everything an adapter needs to build one swap
#[derive(Debug, Clone, PartialEq)]
pub struct TxContext {
    /// Wallet that signs, pays and owns the token accounts
    pub signer: Pubkey,
    /// Asset given up
    pub src_mint: Pubkey,
    /// Asset received
    pub dst_mint: Pubkey,
    /// Reserve snapshot and pool accounts for the venue
    pub pool: PoolData,
    /// Buy: lamports to spend. Sell: tokens to sell.
    pub max_amount_in: u64,
    /// Slippage percentage in `[0, 100]`
    pub slippage_pct: f64,
    /// Compute unit price in micro-lamports, 0 skips the instruction
    pub priority_fee: u64,
    /// Lamports withheld from `max_amount_in` on the buy side
    pub protocol_fee: u64,
    /// Sell side: close the token account after the swap
    pub close_token_account: bool,
}

impl TxContext {
    /// Build a buy context: SOL in, `mint` out
    pub fn buy(signer: Pubkey, mint: Pubkey, pool: PoolData, lamports: u64) -> Self {
        Self {
            signer,
            src_mint: WSOL_MINT,
            dst_mint: mint,
            pool,
            max_amount_in: lamports,
            slippage_pct: 0.0,
            priority_fee: 0,
            protocol_fee: 0,
            close_token_account: false,
        }
    }

    /// Build a sell context: `mint` in, SOL out
    pub fn sell(signer: Pubkey, mint: Pubkey, pool: PoolData, tokens: u64) -> Self {
        Self {
            signer,
            src_mint: mint,
            dst_mint: WSOL_MINT,
            pool,
            max_amount_in: tokens,
            slippage_pct: 0.0,
            priority_fee: 0,
            protocol_fee: 0,
            close_token_account: false,
        }
    }

    pub fn with_slippage(mut self, pct: f64) -> Self {
        self.slippage_pct = pct;
        self
    }

    pub fn with_priority_fee(mut self, micro_lamports: u64) -> Self {
        self.priority_fee = micro_lamports;
        self
    }

    pub fn with_protocol_fee(mut self, lamports: u64) -> Self {
        self.protocol_fee = lamports;
        self
    }

    /// Mark a sell as liquidating the whole position
    pub fn closing(mut self) -> Self {
        self.close_token_account = true;
        self
    }

    /// A trade is a buy unless it pays out wrapped SOL
    pub fn is_buy(&self) -> bool {
        self.dst_mint != WSOL_MINT
    }

    /// The token side of the trade
    pub fn token_mint(&self) -> Pubkey {
        if self.is_buy() {
            self.dst_mint
        } else {
            self.src_mint
        }
    }

    /// Buy-side input after our protocol fee
    pub fn net_amount_in(&self) -> u64 {
        if self.is_buy() {
            self.max_amount_in.saturating_sub(self.protocol_fee)
        } else {
            self.max_amount_in
        }
    }
}
