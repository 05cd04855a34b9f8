//! Constant-product pool venue that curve tokens migrate to

use super::context::TxContext;
use super::errors::TxBuildError;
use super::venue::{
    anchor_discriminator, ata, close_ata, compute_budget, create_ata, encode_args, mismatch,
    wrap_sol, VenueAdapter,
};
use crate::quote::{apply_slippage, estimate_swap_out, CURVE_FEE_BPS};
use crate::types::{PoolData, PumpAmmPool, Venue, WSOL_MINT};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program,
};

pub const PROGRAM_ID: Pubkey = pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");
pub const EVENT_AUTHORITY: Pubkey = pubkey!("GS4CU59F31iL7aR2Q8zVS8DRrcRnXX1yjQ66TqNVQnaR");

const CU_LIMIT: u32 = 120_000;

pub struct PumpAmmAdapter;

fn amm(ctx: &TxContext) -> Result<&PumpAmmPool, TxBuildError> {
    match &ctx.pool {
        PoolData::PumpAmm(p) => Ok(p),
        other => Err(mismatch(Venue::PumpAmm, other)),
    }
}

/// Accounts shared by both swap directions, in program order
fn swap_accounts(owner: &Pubkey, mint: &Pubkey, pool: &PumpAmmPool) -> Vec<AccountMeta> {
    let (global_config, _) = Pubkey::find_program_address(&[b"global_config"], &PROGRAM_ID);
    let (vault_authority, _) = Pubkey::find_program_address(
        &[b"creator_vault", pool.coin_creator.as_ref()],
        &PROGRAM_ID,
    );

    vec![
        AccountMeta::new(pool.pool, false),
        AccountMeta::new(*owner, true),
        AccountMeta::new_readonly(global_config, false),
        AccountMeta::new_readonly(*mint, false),
        AccountMeta::new_readonly(WSOL_MINT, false),
        AccountMeta::new(ata(owner, mint), false),
        AccountMeta::new(ata(owner, &WSOL_MINT), false),
        AccountMeta::new(ata(&pool.pool, mint), false),
        AccountMeta::new(ata(&pool.pool, &WSOL_MINT), false),
        AccountMeta::new_readonly(pool.protocol_fee_recipient, false),
        AccountMeta::new(ata(&pool.protocol_fee_recipient, &WSOL_MINT), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(spl_associated_token_account::id(), false),
        AccountMeta::new_readonly(EVENT_AUTHORITY, false),
        AccountMeta::new_readonly(PROGRAM_ID, false),
        AccountMeta::new(ata(&vault_authority, &WSOL_MINT), false),
        AccountMeta::new_readonly(vault_authority, false),
    ]
}

impl VenueAdapter for PumpAmmAdapter {
    fn venue(&self) -> Venue {
        Venue::PumpAmm
    }

    fn compute_unit_limit(&self) -> u32 {
        CU_LIMIT
    }

    fn quote_min_out(&self, ctx: &TxContext) -> Result<u64, TxBuildError> {
        let pool = amm(ctx)?;
        let raw = if ctx.is_buy() {
            estimate_swap_out(
                ctx.net_amount_in(),
                pool.quote_reserves,
                pool.base_reserves,
                CURVE_FEE_BPS,
            )
        } else {
            estimate_swap_out(
                ctx.max_amount_in,
                pool.base_reserves,
                pool.quote_reserves,
                CURVE_FEE_BPS,
            )
        };
        Ok(apply_slippage(raw, ctx.slippage_pct))
    }

    fn build_instructions(&self, ctx: &TxContext) -> Result<Vec<Instruction>, TxBuildError> {
        let pool = amm(ctx)?;
        let mint = ctx.token_mint();
        let owner = ctx.signer;
        let min_out = self.quote_min_out(ctx)?;

        let mut ixs = compute_budget(CU_LIMIT, ctx.priority_fee);
        let mut accounts = swap_accounts(&owner, &mint, pool);

        if ctx.is_buy() {
            let max_quote_in = ctx.net_amount_in();
            if max_quote_in == 0 {
                return Err(TxBuildError::ZeroAmount("buy input after fees"));
            }
            let (global_volume, _) =
                Pubkey::find_program_address(&[b"global_volume_accumulator"], &PROGRAM_ID);
            let (user_volume, _) = Pubkey::find_program_address(
                &[b"user_volume_accumulator", owner.as_ref()],
                &PROGRAM_ID,
            );
            accounts.push(AccountMeta::new(global_volume, false));
            accounts.push(AccountMeta::new(user_volume, false));

            ixs.extend(wrap_sol(&owner, max_quote_in)?);
            ixs.push(create_ata(&owner, &mint, &spl_token::id()));
            ixs.push(Instruction {
                program_id: PROGRAM_ID,
                accounts,
                data: encode_args(anchor_discriminator("buy"), &[min_out, max_quote_in]),
            });
        } else {
            if ctx.max_amount_in == 0 {
                return Err(TxBuildError::ZeroAmount("sell amount"));
            }
            ixs.push(Instruction {
                program_id: PROGRAM_ID,
                accounts,
                data: encode_args(anchor_discriminator("sell"), &[ctx.max_amount_in, min_out]),
            });
            if ctx.close_token_account {
                ixs.push(close_ata(&owner, &mint)?);
            }
        }

        Ok(ixs)
    }
}
