use super::guard::GuardRejection;
use super::state::SessionState;
use crate::rpc_manager::{ProgramErrorKind, RelayError};
use crate::tx_builder::TxBuildError;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("buy rejected before submission: {0}")]
    Guard(#[from] GuardRejection),

    #[error("a session for {0} is already live")]
    AlreadyLive(Pubkey),

    #[error("no nonce or block hash available")]
    NoBlockhash,

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("build error: {0}")]
    Build(#[from] TxBuildError),

    #[error("buy for {0} confirmed without a token balance change")]
    EmptyFill(Pubkey),

    #[error("sell of {token} failed after {attempts} attempts and the aggregator fallback: {last}")]
    SellExhausted {
        token: Pubkey,
        attempts: u32,
        last: String,
    },

    #[error("illegal state transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("dry run: transaction built but not submitted")]
    DryRun,

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Relay(e) => e.is_retryable(),
            Self::Build(e) => e.is_retryable(),
            Self::NoBlockhash => true,
            _ => false,
        }
    }

    /// Sell-path remediation for this failure
    pub fn program_error_kind(&self) -> ProgramErrorKind {
        match self {
            Self::Relay(e) => e.program_error_kind(),
            _ => ProgramErrorKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_passes_through_relay_errors() {
        let err = SessionError::Relay(RelayError::TransactionFailed {
            signature: "sig".into(),
            message: "custom program error: 0x1771".into(),
        });
        assert_eq!(err.program_error_kind(), ProgramErrorKind::SlippageExceeded);
        assert_eq!(SessionError::NoBlockhash.program_error_kind(), ProgramErrorKind::Transient);
        assert!(SessionError::NoBlockhash.is_retryable());
        assert!(!SessionError::DryRun.is_retryable());
    }
}
