//! Venue adapter contract and shared instruction helpers
//!
//! Each adapter turns a `TxContext` into the ordered instruction list for one
//! swap: compute budget first, then token-account setup, then the program
//! call, then account cleanup on full sells. Adapters never sign and never
//! add the nonce advance; the planner in `instructions` owns that.

use super::context::TxContext;
use super::errors::TxBuildError;
use super::{meteora_dbc::MeteoraDbcAdapter, pump_amm::PumpAmmAdapter, pump_fun::PumpFunAdapter};
use super::raydium_launchpad::RaydiumLaunchpadAdapter;
use crate::types::{PoolData, Venue, WSOL_MINT};
use sha2::{Digest, Sha256};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction, instruction::Instruction, pubkey::Pubkey,
    system_instruction,
};
use spl_associated_token_account::{
    get_associated_token_address_with_program_id,
    instruction::create_associated_token_account_idempotent,
};

/// Builds venue-specific instructions from a shared context
pub trait VenueAdapter: Send + Sync {
    /// Venue this adapter trades on
    fn venue(&self) -> Venue;

    /// Compute unit limit requested for one swap
    fn compute_unit_limit(&self) -> u32;

    /// Minimum output the program call will enforce for this context
    fn quote_min_out(&self, ctx: &TxContext) -> Result<u64, TxBuildError>;

    /// Ordered instruction list for the swap, unsigned
    fn build_instructions(&self, ctx: &TxContext) -> Result<Vec<Instruction>, TxBuildError>;
}

/// Adapter for a venue tag. The aggregator route builds remotely and has none.
pub fn adapter_for(venue: Venue) -> Option<&'static dyn VenueAdapter> {
    match venue {
        Venue::PumpFun => Some(&PumpFunAdapter),
        Venue::PumpAmm => Some(&PumpAmmAdapter),
        Venue::MeteoraDbc => Some(&MeteoraDbcAdapter),
        Venue::RaydiumLaunchpad => Some(&RaydiumLaunchpadAdapter),
        Venue::Aggregator => None,
    }
}

/// Dispatch on the pool payload carried by the context
pub fn build_for_context(ctx: &TxContext) -> Result<Vec<Instruction>, TxBuildError> {
    let venue = ctx.pool.venue();
    adapter_for(venue)
        .ok_or(TxBuildError::UnsupportedVenue(venue))?
        .build_instructions(ctx)
}

/// Anchor instruction discriminator: first 8 bytes of `sha256("global:<name>")`
pub fn anchor_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Discriminator followed by little-endian u64 arguments
pub fn encode_args(discriminator: [u8; 8], args: &[u64]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + 8 * args.len());
    data.extend_from_slice(&discriminator);
    for arg in args {
        data.extend_from_slice(&arg.to_le_bytes());
    }
    data
}

/// Compute unit limit plus an optional price
pub fn compute_budget(cu_limit: u32, priority_fee: u64) -> Vec<Instruction> {
    let mut ixs = Vec::with_capacity(2);
    ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(cu_limit));
    if priority_fee > 0 {
        ixs.push(ComputeBudgetInstruction::set_compute_unit_price(priority_fee));
    }
    ixs
}

pub fn ata(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, &spl_token::id())
}

pub fn ata_with_program(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, token_program)
}

/// Idempotent ATA creation, safe to include on every buy
pub fn create_ata(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Instruction {
    create_associated_token_account_idempotent(owner, owner, mint, token_program)
}

/// Create the WSOL account, fund it with `lamports` and sync it
pub fn wrap_sol(owner: &Pubkey, lamports: u64) -> Result<Vec<Instruction>, TxBuildError> {
    let wsol_ata = ata(owner, &WSOL_MINT);
    let sync = spl_token::instruction::sync_native(&spl_token::id(), &wsol_ata)
        .map_err(|e| TxBuildError::instruction_failed("spl_token", e.to_string()))?;
    Ok(vec![
        create_ata(owner, &WSOL_MINT, &spl_token::id()),
        system_instruction::transfer(owner, &wsol_ata, lamports),
        sync,
    ])
}

/// Close the owner's token account for `mint`, returning rent to the owner
pub fn close_ata(owner: &Pubkey, mint: &Pubkey) -> Result<Instruction, TxBuildError> {
    let account = ata(owner, mint);
    spl_token::instruction::close_account(&spl_token::id(), &account, owner, owner, &[])
        .map_err(|e| TxBuildError::instruction_failed("spl_token", e.to_string()))
}

/// Error for a pool payload that does not belong to the adapter
pub(crate) fn mismatch(adapter: Venue, pool: &PoolData) -> TxBuildError {
    TxBuildError::VenueMismatch {
        adapter,
        pool: pool.venue(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_discriminators_match_known_bytes() {
        assert_eq!(
            anchor_discriminator("buy"),
            [0x66, 0x06, 0x3d, 0x12, 0x01, 0xda, 0xeb, 0xea]
        );
        assert_eq!(
            anchor_discriminator("sell"),
            [0x33, 0xe6, 0x85, 0xa4, 0x01, 0x7f, 0x83, 0xad]
        );
        assert_eq!(
            anchor_discriminator("swap"),
            [248, 198, 158, 145, 225, 117, 135, 200]
        );
    }

    #[test]
    fn test_encode_args_layout() {
        let data = encode_args([1; 8], &[2, u64::MAX]);
        assert_eq!(data.len(), 24);
        assert_eq!(&data[8..16], &2u64.to_le_bytes());
        assert_eq!(&data[16..24], &u64::MAX.to_le_bytes());
    }

    #[test]
    fn test_compute_budget_skips_zero_price() {
        assert_eq!(compute_budget(90_000, 0).len(), 1);
        assert_eq!(compute_budget(90_000, 5).len(), 2);
    }

    #[test]
    fn test_aggregator_has_no_adapter() {
        assert!(adapter_for(Venue::Aggregator).is_none());
        assert!(adapter_for(Venue::PumpFun).is_some());
    }
}
