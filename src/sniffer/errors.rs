//! Error types and retry policies for the Sniffer module

use std::fmt;
use std::time::Duration;

/// Main error type for Sniffer operations
#[derive(Debug, Clone, PartialEq)]
pub enum SnifferError {
    /// Configuration validation error
    ConfigValidation(String),
    /// Feed connection failed
    FeedConnection(String),
    /// Feed disconnected unexpectedly
    FeedDisconnected,
    /// A feed message could not be turned into a swap event
    Parse(String),
    /// Downstream channel closed
    ChannelClosed(String),
    /// Shutdown requested
    ShutdownRequested,
    /// Timeout error
    Timeout(String),
}

impl SnifferError {
    /// Connection-level failures are worth a reconnect
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FeedConnection(_) | Self::FeedDisconnected | Self::Timeout(_)
        )
    }
}

impl fmt::Display for SnifferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigValidation(msg) => write!(f, "Configuration validation error: {}", msg),
            Self::FeedConnection(msg) => write!(f, "Feed connection error: {}", msg),
            Self::FeedDisconnected => write!(f, "Feed disconnected"),
            Self::Parse(msg) => write!(f, "Unparseable event: {}", msg),
            Self::ChannelClosed(msg) => write!(f, "Channel closed: {}", msg),
            Self::ShutdownRequested => write!(f, "Shutdown requested"),
            Self::Timeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

impl std::error::Error for SnifferError {}

/// Exponential backoff with jitter for retry logic
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current_attempt: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy
    pub fn new(initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            current_attempt: 0,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Get the next backoff duration with jitter
    pub fn next_backoff(&mut self) -> Duration {
        let factor = 2_u64.saturating_pow(self.current_attempt);
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);

        self.current_attempt = self.current_attempt.saturating_add(1);

        // Add jitter (±20%)
        let jitter = (backoff_ms / 5) as i64;
        if jitter == 0 {
            return Duration::from_millis(backoff_ms);
        }
        let jitter_amount = rand::random::<i64>().rem_euclid(2 * jitter + 1) - jitter;
        let final_backoff = (backoff_ms as i64 + jitter_amount).max(0) as u64;

        Duration::from_millis(final_backoff)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Get current attempt number
    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let mut backoff = ExponentialBackoff::new(100, 5000);

        let delay1 = backoff.next_backoff();
        assert!(delay1.as_millis() >= 80 && delay1.as_millis() <= 120); // 100ms ± 20%

        let delay2 = backoff.next_backoff();
        assert!(delay2.as_millis() >= 160 && delay2.as_millis() <= 240);
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        let delay3 = backoff.next_backoff();
        assert!(delay3.as_millis() >= 80 && delay3.as_millis() <= 120);
    }

    #[test]
    fn test_backoff_max_limit() {
        let mut backoff = ExponentialBackoff::new(1000, 5000);
        for _ in 0..100 {
            let delay = backoff.next_backoff();
            assert!(delay.as_millis() <= 6000); // 5000ms + jitter
        }
    }

    #[test]
    fn test_tiny_backoff_has_no_jitter() {
        let mut backoff = ExponentialBackoff::new(1, 3);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SnifferError::FeedDisconnected.is_retryable());
        assert!(!SnifferError::Parse("bad".into()).is_retryable());
        assert_eq!(
            SnifferError::FeedConnection("refused".into()).to_string(),
            "Feed connection error: refused"
        );
    }
}
