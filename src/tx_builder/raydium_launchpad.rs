//! Generic launchpad venue

use super::context::TxContext;
use super::errors::TxBuildError;
use super::venue::{
    ata, close_ata, compute_budget, create_ata, encode_args, mismatch, wrap_sol, VenueAdapter,
};
use crate::quote::{apply_slippage, LaunchpadReserves};
use crate::types::{LaunchpadPool, PoolData, Venue, WSOL_MINT};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
};

pub const PROGRAM_ID: Pubkey = pubkey!("LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj");
pub const AUTHORITY: Pubkey = pubkey!("WLHv2UAZm6z4KyaaELi5pjdbJh6RESMva1Rnn8pJVVh");
pub const EVENT_AUTHORITY: Pubkey = pubkey!("2DPAtwB8L12vrMRExbLuyGnC7n2J5LNoZQSejeQGpwkr");

/// Token creation on this venue is signed by the program authority
pub const MINT_AUTHORITY: Pubkey = AUTHORITY;

/// Discriminator of the pool `initialize` instruction
pub const CREATE_DISCRIMINATOR: [u8; 8] = [0xaf, 0xaf, 0x6d, 0x1f, 0x0d, 0x98, 0x9b, 0xed];

/// A create transaction carries at least this many accounts
pub const CREATE_MIN_ACCOUNTS: usize = 18;

const BUY_EXACT_IN: [u8; 8] = [250, 234, 13, 123, 213, 156, 19, 236];
const SELL_EXACT_IN: [u8; 8] = [149, 39, 222, 155, 211, 124, 152, 26];
const CU_LIMIT: u32 = 120_000;

pub struct RaydiumLaunchpadAdapter;

fn launchpad(ctx: &TxContext) -> Result<&LaunchpadPool, TxBuildError> {
    match &ctx.pool {
        PoolData::RaydiumLaunchpad(p) => Ok(p),
        other => Err(mismatch(Venue::RaydiumLaunchpad, other)),
    }
}

impl VenueAdapter for RaydiumLaunchpadAdapter {
    fn venue(&self) -> Venue {
        Venue::RaydiumLaunchpad
    }

    fn compute_unit_limit(&self) -> u32 {
        CU_LIMIT
    }

    fn quote_min_out(&self, ctx: &TxContext) -> Result<u64, TxBuildError> {
        let pool = launchpad(ctx)?;
        let reserves = LaunchpadReserves::from_real(pool.real_base, pool.real_quote);
        let raw = if ctx.is_buy() {
            reserves.buy_out(ctx.net_amount_in())
        } else {
            reserves.sell_out(ctx.max_amount_in)
        };
        Ok(apply_slippage(raw, ctx.slippage_pct))
    }

    fn build_instructions(&self, ctx: &TxContext) -> Result<Vec<Instruction>, TxBuildError> {
        let pool = launchpad(ctx)?;
        let mint = ctx.token_mint();
        let owner = ctx.signer;
        let amount_in = ctx.net_amount_in();
        if amount_in == 0 {
            return Err(TxBuildError::ZeroAmount("swap input"));
        }
        let min_out = self.quote_min_out(ctx)?;

        let mut ixs = compute_budget(CU_LIMIT, ctx.priority_fee);
        let discriminator = if ctx.is_buy() {
            ixs.extend(wrap_sol(&owner, amount_in)?);
            ixs.push(create_ata(&owner, &mint, &spl_token::id()));
            BUY_EXACT_IN
        } else {
            ixs.push(create_ata(&owner, &WSOL_MINT, &spl_token::id()));
            SELL_EXACT_IN
        };

        ixs.push(Instruction {
            program_id: PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(owner, true),
                AccountMeta::new_readonly(AUTHORITY, false),
                AccountMeta::new_readonly(pool.global_config, false),
                AccountMeta::new_readonly(pool.platform_config, false),
                AccountMeta::new(pool.pool_state, false),
                AccountMeta::new(ata(&owner, &mint), false),
                AccountMeta::new(ata(&owner, &WSOL_MINT), false),
                AccountMeta::new(pool.base_vault, false),
                AccountMeta::new(pool.quote_vault, false),
                AccountMeta::new_readonly(mint, false),
                AccountMeta::new_readonly(WSOL_MINT, false),
                AccountMeta::new_readonly(spl_token::id(), false),
                AccountMeta::new_readonly(spl_token::id(), false),
                AccountMeta::new_readonly(EVENT_AUTHORITY, false),
                AccountMeta::new_readonly(PROGRAM_ID, false),
            ],
            // trailing zero is the share fee rate
            data: encode_args(discriminator, &[amount_in, min_out, 0]),
        });

        if !ctx.is_buy() {
            ixs.push(close_ata(&owner, &WSOL_MINT)?);
            if ctx.close_token_account {
                ixs.push(close_ata(&owner, &mint)?);
            }
        }

        Ok(ixs)
    }
}
