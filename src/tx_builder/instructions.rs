//! Instruction planning and ordering validation
//!
//! Durable nonce transactions must lead with `advance_nonce_account`; the
//! venue instructions (compute budget first) follow unchanged.

use crate::tx_builder::errors::TxBuildError;
use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, system_instruction, system_program,
};

/// Ordered instructions plus whether they lead with a nonce advance
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,
    /// `true`: the first instruction is `advance_nonce_account`
    pub is_durable: bool,
}

impl InstructionPlan {
    pub fn new(instructions: Vec<Instruction>, is_durable: bool) -> Self {
        Self {
            instructions,
            is_durable,
        }
    }
}

/// Prepend the nonce advance, when a `(nonce_account, authority)` pair is
/// given, to the adapter's instruction list
pub fn plan_instructions(
    exec_durable: Option<(Pubkey, Pubkey)>,
    venue_ixs: Vec<Instruction>,
) -> Result<InstructionPlan, TxBuildError> {
    if venue_ixs.is_empty() {
        return Err(TxBuildError::invalid_order("Venue produced no instructions"));
    }

    let mut instructions = Vec::with_capacity(venue_ixs.len() + 1);
    let is_durable = exec_durable.is_some();

    if let Some((nonce_account, nonce_authority)) = exec_durable {
        instructions.push(system_instruction::advance_nonce_account(
            &nonce_account,
            &nonce_authority,
        ));
    }
    instructions.extend(venue_ixs);

    let plan = InstructionPlan::new(instructions, is_durable);
    sanity_check_ix_order(&plan.instructions, plan.is_durable)?;
    Ok(plan)
}

/// `advance_nonce_account` is system instruction 4, encoded as a u32
#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn is_advance_nonce(ix: &Instruction) -> bool {
    ix.program_id == system_program::id() && ix.data.len() >= 4 && ix.data[..4] == [4, 0, 0, 0]
}

/// Validate instruction ordering (debug/test only)
///
/// Durable plans must start with exactly one `advance_nonce_account`;
/// non-durable plans must contain none.
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(
    instructions: &[Instruction],
    is_durable: bool,
) -> Result<(), TxBuildError> {
    let Some(first) = instructions.first() else {
        return Err(TxBuildError::invalid_order("Instruction list is empty"));
    };

    if is_durable {
        if !is_advance_nonce(first) {
            return Err(TxBuildError::invalid_order(format!(
                "Durable nonce transaction must start with advance_nonce_account, got program_id: {}",
                first.program_id
            )));
        }
        if let Some(idx) = instructions.iter().skip(1).position(is_advance_nonce) {
            return Err(TxBuildError::invalid_order(format!(
                "Multiple advance_nonce_account instructions found (at position {})",
                idx + 1
            )));
        }
    } else if let Some(idx) = instructions.iter().position(is_advance_nonce) {
        return Err(TxBuildError::invalid_order(format!(
            "Non-durable transaction should not have advance_nonce_account (found at position {idx})"
        )));
    }

    Ok(())
}

#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(
    _instructions: &[Instruction],
    _is_durable: bool,
) -> Result<(), TxBuildError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::AccountMeta;

    fn venue_ix() -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1, 2, 3, 4],
            vec![AccountMeta::new(Pubkey::new_unique(), false)],
        )
    }

    #[test]
    fn test_plan_durable_leads_with_advance() {
        let plan = plan_instructions(
            Some((Pubkey::new_unique(), Pubkey::new_unique())),
            vec![venue_ix(), venue_ix()],
        )
        .expect("durable plan");

        assert!(plan.is_durable);
        assert_eq!(plan.instructions.len(), 3);
        assert!(is_advance_nonce(&plan.instructions[0]));
    }

    #[test]
    fn test_plan_without_nonce_is_unchanged() {
        let ixs = vec![venue_ix()];
        let plan = plan_instructions(None, ixs.clone()).expect("plain plan");
        assert!(!plan.is_durable);
        assert_eq!(plan.instructions, ixs);
    }

    #[test]
    fn test_plan_rejects_empty_venue_list() {
        assert!(matches!(
            plan_instructions(None, vec![]),
            Err(TxBuildError::InvalidInstructionOrder(_))
        ));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_sanity_check_rejects_misplaced_advance() {
        let advance = system_instruction::advance_nonce_account(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
        );
        assert!(sanity_check_ix_order(&[venue_ix(), advance.clone()], true).is_err());
        assert!(sanity_check_ix_order(&[advance.clone(), advance.clone()], true).is_err());
        assert!(sanity_check_ix_order(&[venue_ix(), advance], false).is_err());
        assert!(sanity_check_ix_order(&[], false).is_err());
    }
}
