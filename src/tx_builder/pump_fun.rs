//! Bonding-curve launch venue

use super::context::TxContext;
use super::errors::TxBuildError;
use super::venue::{
    anchor_discriminator, ata, close_ata, compute_budget, create_ata, encode_args, mismatch,
    VenueAdapter,
};
use crate::quote::{apply_slippage, quote_curve_buy_after_fee, quote_sell_by_curve};
use crate::types::{PoolData, PumpFunPool, Venue};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program,
};

pub const PROGRAM_ID: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
pub const EVENT_AUTHORITY: Pubkey = pubkey!("Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1");
pub const FEE_CONFIG: Pubkey = pubkey!("8Wf5TiAheLUqBrKXeYg2JtAFFMWtKdG2BSFgqUcPVwTt");
pub const FEE_PROGRAM: Pubkey = pubkey!("pfeeUxB6jkeY1Hxd7CsFCAjcbHA9rWtchMGdZ6VojVZ");
pub const PROTOCOL_FEE_RECIPIENTS: [Pubkey; 1] =
    [pubkey!("62qc2CNXwrYqQScmEdiZFFAnJR262PxWEuNQtxfafNgV")];

/// Mint authority that signs every token created on this venue
pub const MINT_AUTHORITY: Pubkey = pubkey!("TSLvdd1pWpHVjahSpsvCXUbgwsL3JAcvokwaKt1eokM");

const CU_LIMIT: u32 = 90_000;

pub struct PumpFunAdapter;

struct CurveAccounts {
    global: Pubkey,
    bonding_curve: Pubkey,
    associated_bonding_curve: Pubkey,
    creator_vault: Pubkey,
}

impl CurveAccounts {
    fn derive(mint: &Pubkey, creator: &Pubkey) -> Self {
        let (global, _) = Pubkey::find_program_address(&[b"global"], &PROGRAM_ID);
        let (bonding_curve, _) =
            Pubkey::find_program_address(&[b"bonding-curve", mint.as_ref()], &PROGRAM_ID);
        let (creator_vault, _) =
            Pubkey::find_program_address(&[b"creator-vault", creator.as_ref()], &PROGRAM_ID);
        Self {
            global,
            associated_bonding_curve: ata(&bonding_curve, mint),
            bonding_curve,
            creator_vault,
        }
    }
}

fn pick_fee_recipient() -> Pubkey {
    PROTOCOL_FEE_RECIPIENTS[fastrand::usize(..PROTOCOL_FEE_RECIPIENTS.len())]
}

fn curve(ctx: &TxContext) -> Result<&PumpFunPool, TxBuildError> {
    match &ctx.pool {
        PoolData::PumpFun(p) => Ok(p),
        other => Err(mismatch(Venue::PumpFun, other)),
    }
}

impl VenueAdapter for PumpFunAdapter {
    fn venue(&self) -> Venue {
        Venue::PumpFun
    }

    fn compute_unit_limit(&self) -> u32 {
        CU_LIMIT
    }

    fn quote_min_out(&self, ctx: &TxContext) -> Result<u64, TxBuildError> {
        let pool = curve(ctx)?;
        let raw = if ctx.is_buy() {
            quote_curve_buy_after_fee(
                ctx.net_amount_in(),
                pool.virtual_sol_reserves,
                pool.virtual_token_reserves,
            )
        } else {
            quote_sell_by_curve(
                ctx.max_amount_in,
                pool.virtual_sol_reserves,
                pool.virtual_token_reserves,
            )
        };
        Ok(apply_slippage(raw, ctx.slippage_pct))
    }

    fn build_instructions(&self, ctx: &TxContext) -> Result<Vec<Instruction>, TxBuildError> {
        let pool = curve(ctx)?;
        let mint = ctx.token_mint();
        let owner = ctx.signer;
        let accounts = CurveAccounts::derive(&mint, &pool.creator);
        let user_ata = ata(&owner, &mint);
        let min_out = self.quote_min_out(ctx)?;

        let mut ixs = compute_budget(CU_LIMIT, ctx.priority_fee);

        if ctx.is_buy() {
            let max_sol_cost = ctx.net_amount_in();
            if max_sol_cost == 0 {
                return Err(TxBuildError::ZeroAmount("buy input after fees"));
            }
            let (global_volume, _) =
                Pubkey::find_program_address(&[b"global_volume_accumulator"], &PROGRAM_ID);
            let (user_volume, _) = Pubkey::find_program_address(
                &[b"user_volume_accumulator", owner.as_ref()],
                &PROGRAM_ID,
            );
            ixs.push(create_ata(&owner, &mint, &spl_token::id()));
            ixs.push(Instruction {
                program_id: PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new_readonly(accounts.global, false),
                    AccountMeta::new(pick_fee_recipient(), false),
                    AccountMeta::new_readonly(mint, false),
                    AccountMeta::new(accounts.bonding_curve, false),
                    AccountMeta::new(accounts.associated_bonding_curve, false),
                    AccountMeta::new(user_ata, false),
                    AccountMeta::new(owner, true),
                    AccountMeta::new_readonly(system_program::id(), false),
                    AccountMeta::new_readonly(spl_token::id(), false),
                    AccountMeta::new(accounts.creator_vault, false),
                    AccountMeta::new_readonly(EVENT_AUTHORITY, false),
                    AccountMeta::new_readonly(PROGRAM_ID, false),
                    AccountMeta::new(global_volume, false),
                    AccountMeta::new(user_volume, false),
                    AccountMeta::new_readonly(FEE_CONFIG, false),
                    AccountMeta::new_readonly(FEE_PROGRAM, false),
                ],
                data: encode_args(anchor_discriminator("buy"), &[min_out, max_sol_cost]),
            });
        } else {
            if ctx.max_amount_in == 0 {
                return Err(TxBuildError::ZeroAmount("sell amount"));
            }
            ixs.push(Instruction {
                program_id: PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new_readonly(accounts.global, false),
                    AccountMeta::new(pick_fee_recipient(), false),
                    AccountMeta::new_readonly(mint, false),
                    AccountMeta::new(accounts.bonding_curve, false),
                    AccountMeta::new(accounts.associated_bonding_curve, false),
                    AccountMeta::new(user_ata, false),
                    AccountMeta::new(owner, true),
                    AccountMeta::new_readonly(system_program::id(), false),
                    AccountMeta::new(accounts.creator_vault, false),
                    AccountMeta::new_readonly(spl_token::id(), false),
                    AccountMeta::new_readonly(EVENT_AUTHORITY, false),
                    AccountMeta::new_readonly(PROGRAM_ID, false),
                    AccountMeta::new_readonly(FEE_CONFIG, false),
                    AccountMeta::new_readonly(FEE_PROGRAM, false),
                ],
                data: encode_args(
                    anchor_discriminator("sell"),
                    &[ctx.max_amount_in, min_out],
                ),
            });
            if ctx.close_token_account {
                ixs.push(close_ata(&owner, &mint)?);
            }
        }

        Ok(ixs)
    }
}

/// Decode `(first, second)` u64 arguments from a swap instruction's data
pub fn decode_args(data: &[u8]) -> Option<(u64, u64)> {
    if data.len() < 24 {
        return None;
    }
    let first = u64::from_le_bytes(data[8..16].try_into().ok()?);
    let second = u64::from_le_bytes(data[16..24].try_into().ok()?);
    Some((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{apply_slippage, deduct_fee, quote_buy_by_curve, CURVE_FEE_BPS};

    fn pool() -> PoolData {
        PoolData::PumpFun(PumpFunPool {
            creator: Pubkey::new_unique(),
            virtual_sol_reserves: 30_000_000_000,
            virtual_token_reserves: 1_073_000_000_000_000,
            real_sol_reserves: 0,
            real_token_reserves: 793_100_000_000_000,
        })
    }

    #[test]
    fn test_buy_instruction_layout() {
        let ctx = TxContext::buy(Pubkey::new_unique(), Pubkey::new_unique(), pool(), 2_000_000_000)
            .with_slippage(10.0)
            .with_priority_fee(1_000);
        let ixs = PumpFunAdapter.build_instructions(&ctx).unwrap();
        // cu limit, cu price, create ata, buy
        assert_eq!(ixs.len(), 4);
        let buy = ixs.last().unwrap();
        assert_eq!(buy.program_id, PROGRAM_ID);
        assert_eq!(buy.accounts.len(), 16);
        assert_eq!(&buy.data[..8], &anchor_discriminator("buy"));

        let (min_out, max_cost) = decode_args(&buy.data).unwrap();
        assert_eq!(max_cost, 2_000_000_000);
        let expected = apply_slippage(
            quote_buy_by_curve(
                deduct_fee(2_000_000_000, CURVE_FEE_BPS),
                30_000_000_000,
                1_073_000_000_000_000,
            ),
            10.0,
        );
        assert_eq!(min_out, expected);
    }

    #[test]
    fn test_protocol_fee_reduces_max_cost() {
        let ctx = TxContext::buy(Pubkey::new_unique(), Pubkey::new_unique(), pool(), 1_000_000)
            .with_protocol_fee(1_000);
        let ixs = PumpFunAdapter.build_instructions(&ctx).unwrap();
        let (_, max_cost) = decode_args(&ixs.last().unwrap().data).unwrap();
        assert_eq!(max_cost, 999_000);
    }

    #[test]
    fn test_full_sell_closes_account() {
        let mint = Pubkey::new_unique();
        let partial = TxContext::sell(Pubkey::new_unique(), mint, pool(), 1_000_000);
        let ixs = PumpFunAdapter.build_instructions(&partial).unwrap();
        assert_eq!(ixs.last().unwrap().program_id, PROGRAM_ID);

        let full = partial.clone().closing();
        let ixs = PumpFunAdapter.build_instructions(&full).unwrap();
        assert_eq!(ixs.last().unwrap().program_id, spl_token::id());
        assert_eq!(ixs[ixs.len() - 2].accounts.len(), 14);
    }

    #[test]
    fn test_rejects_foreign_pool() {
        let other = PoolData::PumpAmm(crate::types::PumpAmmPool {
            pool: Pubkey::new_unique(),
            coin_creator: Pubkey::new_unique(),
            protocol_fee_recipient: Pubkey::new_unique(),
            base_reserves: 1,
            quote_reserves: 1,
        });
        let ctx = TxContext::buy(Pubkey::new_unique(), Pubkey::new_unique(), other, 1);
        assert!(matches!(
            PumpFunAdapter.build_instructions(&ctx),
            Err(TxBuildError::VenueMismatch { .. })
        ));
    }
}
