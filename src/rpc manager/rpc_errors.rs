use crate::tx_builder::TxBuildError;
use once_cell::sync::Lazy;
use regex::Regex;
use solana_client::client_error::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Relay and confirmation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// The endpoint answered with an error payload
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    /// The transaction landed but the program rejected it
    #[error("Transaction {signature} failed on chain: {message}")]
    TransactionFailed { signature: String, message: String },

    /// No confirmation within the waiting window
    #[error("Transaction {signature} not confirmed within {timeout_ms}ms")]
    ConfirmationTimeout { signature: String, timeout_ms: u64 },

    /// Building or signing the channel's copy failed
    #[error("Build error: {0}")]
    Build(#[from] TxBuildError),

    /// Every channel in a race failed
    #[error("All {count} relay channels failed; last error: {last}")]
    AllChannelsFailed { count: usize, last: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Transport { .. } => true,
            RelayError::Timeout { .. } => true,
            RelayError::RateLimitExceeded { .. } => true,
            RelayError::ConfirmationTimeout { .. } => true,
            RelayError::AllChannelsFailed { .. } => true,
            RelayError::Build(e) => e.is_retryable(),
            RelayError::RpcResponse { .. } | RelayError::TransactionFailed { .. } => {
                self.program_error_kind().is_retryable()
            }
            RelayError::Configuration(_) => false,
        }
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RelayError::Transport { endpoint, .. } => Some(endpoint),
            RelayError::Timeout { endpoint, .. } => Some(endpoint),
            RelayError::RpcResponse { endpoint, .. } => Some(endpoint),
            RelayError::RateLimitExceeded { endpoint } => Some(endpoint),
            _ => None,
        }
    }

    /// Classify the error text for the sell retry policy
    pub fn program_error_kind(&self) -> ProgramErrorKind {
        if let RelayError::RateLimitExceeded { .. } = self {
            return ProgramErrorKind::RateLimited;
        }
        ProgramErrorKind::classify(&self.to_string())
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
            RelayError::RateLimitExceeded {
                endpoint: endpoint.to_string(),
            }
        } else if lower.contains("timeout") || lower.contains("timed out") {
            RelayError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms: 0,
            }
        } else {
            RelayError::RpcResponse {
                endpoint: endpoint.to_string(),
                code: custom_code(&message).map(i64::from),
                message,
            }
        }
    }

    /// Create from a reqwest failure
    pub fn from_http_error(err: reqwest::Error, endpoint: &str) -> Self {
        if err.is_timeout() {
            RelayError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms: 0,
            }
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            RelayError::RateLimitExceeded {
                endpoint: endpoint.to_string(),
            }
        } else {
            RelayError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// What a failed sell should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramErrorKind {
    /// Custom codes 6001-6004: widen slippage ×1.5
    SlippageExceeded,
    /// Custom code 6023: re-query the remaining balance and retry
    InsufficientBalance,
    /// Codes 38 and 3012: the token account is gone, treat as sold
    AccountClosed,
    /// HTTP 429 or "rate limit": back off 2s
    RateLimited,
    /// Anything else: re-query and back off 500ms
    Transient,
}

static HEX_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)custom program error:\s*0x([0-9a-f]+)").expect("static regex"));
static DEC_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"Custom(?:\(|"?:\s*)(\d+)"#).expect("static regex"));
static SUFFIX_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\s*(\d{2,5})\s*$").expect("static regex"));
static RATE_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b429\b|rate.?limit|too many requests").expect("static regex"));

/// Extract a custom program error code from an error string
pub fn custom_code(message: &str) -> Option<u32> {
    if let Some(c) = HEX_CODE.captures(message) {
        return u32::from_str_radix(&c[1], 16).ok();
    }
    if let Some(c) = DEC_CODE.captures(message) {
        return c[1].parse().ok();
    }
    SUFFIX_CODE
        .captures(message.trim())
        .and_then(|c| c[1].parse().ok())
}

impl ProgramErrorKind {
    pub fn classify(message: &str) -> Self {
        match custom_code(message) {
            Some(6001..=6004) => return Self::SlippageExceeded,
            Some(6023) => return Self::InsufficientBalance,
            Some(38) | Some(3012) => return Self::AccountClosed,
            _ => {}
        }
        if RATE_LIMIT.is_match(message) {
            Self::RateLimited
        } else {
            Self::Transient
        }
    }

    /// Delay before the next attempt
    pub fn backoff(&self) -> Duration {
        match self {
            Self::RateLimited => Duration::from_secs(2),
            Self::Transient => Duration::from_millis(500),
            _ => Duration::ZERO,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AccountClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_code_forms() {
        assert_eq!(custom_code("custom program error: 0x1771"), Some(6001));
        assert_eq!(custom_code(r#"{"InstructionError":[3,{"Custom":6023}]}"#), Some(6023));
        assert_eq!(custom_code("InstructionError(3, Custom(3012))"), Some(3012));
        assert_eq!(custom_code("program failed with error code:6023"), Some(6023));
        assert_eq!(custom_code("connection reset"), None);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            ProgramErrorKind::classify("custom program error: 0x1774"),
            ProgramErrorKind::SlippageExceeded
        );
        assert_eq!(
            ProgramErrorKind::classify("simulation failed:6023"),
            ProgramErrorKind::InsufficientBalance
        );
        assert_eq!(
            ProgramErrorKind::classify("custom program error: 0x26"),
            ProgramErrorKind::AccountClosed
        );
        assert_eq!(
            ProgramErrorKind::classify("HTTP status 429 Too Many Requests"),
            ProgramErrorKind::RateLimited
        );
        assert_eq!(
            ProgramErrorKind::classify("blockhash not found"),
            ProgramErrorKind::Transient
        );
    }

    #[test]
    fn test_backoffs() {
        assert_eq!(ProgramErrorKind::RateLimited.backoff(), Duration::from_secs(2));
        assert_eq!(ProgramErrorKind::Transient.backoff(), Duration::from_millis(500));
        assert_eq!(ProgramErrorKind::SlippageExceeded.backoff(), Duration::ZERO);
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(RelayError::Transport {
            endpoint: "test".to_string(),
            message: "connection failed".to_string(),
        }
        .is_retryable());
        assert!(!RelayError::Configuration("no channels".into()).is_retryable());
        assert!(!RelayError::TransactionFailed {
            signature: "sig".into(),
            message: "custom program error: 0xbc4".into(),
        }
        .is_retryable());
        assert_eq!(
            RelayError::RateLimitExceeded {
                endpoint: "x".into()
            }
            .program_error_kind(),
            ProgramErrorKind::RateLimited
        );
    }

    #[test]
    fn test_error_endpoint() {
        let err = RelayError::Timeout {
            endpoint: "https://test.com".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.endpoint(), Some("https://test.com"));
        assert_eq!(RelayError::Configuration("x".into()).endpoint(), None);
    }
}
