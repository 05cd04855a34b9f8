use solana_client::client_error::ClientError;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Nonce pool errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NonceError {
    /// RPC operation failed
    #[error("RPC error: {message} (endpoint: {endpoint:?})")]
    Rpc {
        endpoint: Option<String>,
        message: String,
    },

    /// Account data is not a nonce account
    #[error("Nonce account error: {0}")]
    InvalidNonceAccount(String),

    /// The account exists but has never been initialized as a nonce
    #[error("Nonce account {0} is uninitialized")]
    Uninitialized(Pubkey),

    /// The account does not exist on chain
    #[error("Nonce account {0} not found")]
    AccountNotFound(Pubkey),

    /// Push subscription could not be opened or dropped
    #[error("Subscription error for {account}: {message}")]
    Subscription { account: Pubkey, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NonceError {
    /// Check if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        match self {
            NonceError::Rpc { .. } => true,
            NonceError::Subscription { .. } => true,
            // the account may be created or initialized later
            NonceError::AccountNotFound(_) => true,
            NonceError::Uninitialized(_) => true,

            NonceError::InvalidNonceAccount(_) => false,
            NonceError::Configuration(_) => false,
        }
    }

    /// Convert from ClientError
    pub fn from_client_error(err: ClientError, endpoint: Option<String>) -> Self {
        NonceError::Rpc {
            endpoint,
            message: err.to_string(),
        }
    }
}

impl From<ClientError> for NonceError {
    fn from(err: ClientError) -> Self {
        NonceError::from_client_error(err, None)
    }
}

/// Result type for nonce operations
pub type NonceResult<T> = Result<T, NonceError>;
