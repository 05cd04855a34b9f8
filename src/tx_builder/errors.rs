//! Error types for transaction building
//!
//! Building is local and deterministic, so almost nothing here is retryable:
//! the caller either fixes its inputs or aborts the trade.

use crate::types::Venue;
use thiserror::Error;

/// Errors raised while turning a `TxContext` into instructions or a signed
/// transaction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxBuildError {
    /// The context carries pool data for a different venue than the adapter
    #[error("Venue mismatch: adapter {adapter} got pool data for {pool}")]
    VenueMismatch {
        /// Venue of the adapter that was asked to build
        adapter: Venue,
        /// Venue of the pool payload in the context
        pool: Venue,
    },

    /// No adapter exists for the venue (aggregator routes build remotely)
    #[error("No instruction adapter for venue {0}")]
    UnsupportedVenue(Venue),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program the instruction targets
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// The amount to trade is zero after fees
    #[error("Nothing to trade: {0}")]
    ZeroAmount(&'static str),

    /// Invalid instruction order or structure
    ///
    /// Durable nonce transactions require `advance_nonce_account` first.
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Neither a nonce nor a block hash was available
    #[error("Blockhash error: {0}")]
    Blockhash(String),
}

impl TxBuildError {
    /// Only a missing block hash can resolve itself
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Blockhash(_))
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::VenueMismatch { .. } | Self::UnsupportedVenue(_) => "venue",
            Self::InstructionBuild { .. } => "instruction",
            Self::ZeroAmount(_) => "amount",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::Signing(_) => "signing",
            Self::Blockhash(_) => "blockhash",
        }
    }

    /// Create an instruction build error for a specific program
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid instruction order error
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TxBuildError::VenueMismatch {
            adapter: Venue::PumpFun,
            pool: Venue::PumpAmm,
        };
        assert_eq!(
            err.to_string(),
            "Venue mismatch: adapter pump_fun got pool data for pump_amm"
        );

        let err = TxBuildError::instruction_failed("spl_token", "bad account");
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=spl_token): bad account"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(TxBuildError::Blockhash("stale".into()).is_retryable());
        assert!(!TxBuildError::ZeroAmount("buy").is_retryable());
        assert!(!TxBuildError::UnsupportedVenue(Venue::Aggregator).is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(TxBuildError::Signing("x".into()).category(), "signing");
        assert_eq!(
            TxBuildError::UnsupportedVenue(Venue::Aggregator).category(),
            "venue"
        );
    }
}
