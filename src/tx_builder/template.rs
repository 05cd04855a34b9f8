//! Unsigned transaction template shared by every relay channel
//!
//! A template is built once per order. Each relay channel appends its own tip
//! instruction and signs its own copy, so one order can fan out across
//! channels with different tip accounts.

use super::context::TxContext;
use super::errors::TxBuildError;
use super::instructions::{plan_instructions, InstructionPlan};
use super::venue::build_for_context;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};

/// Where the transaction's recent-hash slot comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Durable nonce: the stored nonce value replaces the block hash
    Nonce {
        account: Pubkey,
        authority: Pubkey,
        hash: Hash,
    },
    /// Recent block hash from the cache
    Blockhash(Hash),
}

impl Freshness {
    pub fn hash(&self) -> Hash {
        match self {
            Self::Nonce { hash, .. } => *hash,
            Self::Blockhash(hash) => *hash,
        }
    }

    pub fn nonce_account(&self) -> Option<Pubkey> {
        match self {
            Self::Nonce { account, .. } => Some(*account),
            Self::Blockhash(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxTemplate {
    pub payer: Pubkey,
    pub plan: InstructionPlan,
    pub hash: Hash,
}

impl TxTemplate {
    /// Build the venue instructions for `ctx` and plan them against `freshness`
    pub fn build(ctx: &TxContext, freshness: Freshness) -> Result<Self, TxBuildError> {
        let venue_ixs = build_for_context(ctx)?;
        let durable = match freshness {
            Freshness::Nonce {
                account, authority, ..
            } => Some((account, authority)),
            Freshness::Blockhash(_) => None,
        };
        Ok(Self {
            payer: ctx.signer,
            plan: plan_instructions(durable, venue_ixs)?,
            hash: freshness.hash(),
        })
    }

    /// Template from an already planned instruction list
    pub fn from_plan(payer: Pubkey, plan: InstructionPlan, hash: Hash) -> Self {
        Self { payer, plan, hash }
    }

    /// Sign a copy with `extra` instructions (the channel's tip) appended
    pub fn sign(&self, signer: &Keypair, extra: &[Instruction]) -> Result<Transaction, TxBuildError> {
        if signer.pubkey() != self.payer {
            return Err(TxBuildError::Signing(format!(
                "signer {} is not the payer {}",
                signer.pubkey(),
                self.payer
            )));
        }
        let mut ixs = Vec::with_capacity(self.plan.instructions.len() + extra.len());
        ixs.extend_from_slice(&self.plan.instructions);
        ixs.extend_from_slice(extra);

        let mut tx = Transaction::new_with_payer(&ixs, Some(&self.payer));
        tx.try_sign(&[signer], self.hash)
            .map_err(|e| TxBuildError::Signing(e.to_string()))?;
        Ok(tx)
    }
}
