//! Dynamic bonding curve venue
//!
//! Pools price by a sqrt price rather than reserves, so quotes here come from
//! `estimate_out_by_sqrt_price` and its inverse. Base mints may live under
//! Token-2022; the quote side is always wrapped SOL under the classic token
//! program.

use super::context::TxContext;
use super::errors::TxBuildError;
use super::venue::{
    anchor_discriminator, ata, ata_with_program, close_ata, compute_budget, create_ata,
    encode_args, mismatch, wrap_sol, VenueAdapter,
};
use crate::quote::{apply_slippage, estimate_out_by_sqrt_price, estimate_quote_out_by_sqrt_price};
use crate::types::{MeteoraDbcPool, PoolData, Venue, WSOL_MINT};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
};

pub const PROGRAM_ID: Pubkey = pubkey!("dbcij3LWUppWqq96dh6gJWwBifmcGfLSB5D4DuSMaqN");
pub const POOL_AUTHORITY: Pubkey = pubkey!("FhVo3mqL8PW5pH5U2CN4XE33DokiyZnUwuGpH2hmHLuM");

const CU_LIMIT: u32 = 80_000;
const BASE_DECIMALS: u32 = 6;
const TRADE_FEE_BPS: u64 = 100;

pub struct MeteoraDbcAdapter;

fn dbc(ctx: &TxContext) -> Result<&MeteoraDbcPool, TxBuildError> {
    match &ctx.pool {
        PoolData::MeteoraDbc(p) => Ok(p),
        other => Err(mismatch(Venue::MeteoraDbc, other)),
    }
}

fn event_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"__event_authority"], &PROGRAM_ID).0
}

impl VenueAdapter for MeteoraDbcAdapter {
    fn venue(&self) -> Venue {
        Venue::MeteoraDbc
    }

    fn compute_unit_limit(&self) -> u32 {
        CU_LIMIT
    }

    fn quote_min_out(&self, ctx: &TxContext) -> Result<u64, TxBuildError> {
        let pool = dbc(ctx)?;
        let raw = if ctx.is_buy() {
            estimate_out_by_sqrt_price(
                ctx.net_amount_in(),
                pool.next_sqrt_price,
                BASE_DECIMALS,
                TRADE_FEE_BPS,
            )
        } else {
            estimate_quote_out_by_sqrt_price(
                ctx.max_amount_in,
                pool.next_sqrt_price,
                BASE_DECIMALS,
                TRADE_FEE_BPS,
            )
        };
        Ok(apply_slippage(raw, ctx.slippage_pct))
    }

    fn build_instructions(&self, ctx: &TxContext) -> Result<Vec<Instruction>, TxBuildError> {
        let pool = dbc(ctx)?;
        let mint = ctx.token_mint();
        let owner = ctx.signer;
        let base_program = pool.token_base_program;
        let user_base = ata_with_program(&owner, &mint, &base_program);
        let user_quote = ata(&owner, &WSOL_MINT);
        let amount_in = ctx.net_amount_in();
        if amount_in == 0 {
            return Err(TxBuildError::ZeroAmount("swap input"));
        }
        let min_out = self.quote_min_out(ctx)?;

        let mut ixs = compute_budget(CU_LIMIT, ctx.priority_fee);
        let (input, output) = if ctx.is_buy() {
            ixs.extend(wrap_sol(&owner, amount_in)?);
            ixs.push(create_ata(&owner, &mint, &base_program));
            (user_quote, user_base)
        } else {
            ixs.push(create_ata(&owner, &WSOL_MINT, &spl_token::id()));
            (user_base, user_quote)
        };

        ixs.push(Instruction {
            program_id: PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(POOL_AUTHORITY, false),
                AccountMeta::new_readonly(pool.config, false),
                AccountMeta::new(pool.pool, false),
                AccountMeta::new(input, false),
                AccountMeta::new(output, false),
                AccountMeta::new(pool.base_vault, false),
                AccountMeta::new(pool.quote_vault, false),
                AccountMeta::new_readonly(mint, false),
                AccountMeta::new_readonly(WSOL_MINT, false),
                AccountMeta::new(owner, true),
                AccountMeta::new_readonly(base_program, false),
                AccountMeta::new_readonly(spl_token::id(), false),
                // referral: our own input account
                AccountMeta::new(input, false),
                AccountMeta::new_readonly(event_authority(), false),
                AccountMeta::new_readonly(PROGRAM_ID, false),
            ],
            data: encode_args(anchor_discriminator("swap"), &[amount_in, min_out]),
        });

        if !ctx.is_buy() {
            // proceeds land in the WSOL account; closing it unwraps them
            ixs.push(close_ata(&owner, &WSOL_MINT)?);
            // close_account only accepts the classic token program
            if ctx.close_token_account && base_program == spl_token::id() {
                ixs.push(close_ata(&owner, &mint)?);
            }
        }

        Ok(ixs)
    }
}
