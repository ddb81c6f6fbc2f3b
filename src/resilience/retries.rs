//! Retry policy for direct requests.
//!
//! # Responsibilities
//! - Bound the attempts spent on one request
//! - Decide which failures are worth another endpoint
//!
//! # Design Decisions
//! - Only transport failures are retried; an HTTP answer of any status is final
//! - Each attempt goes to the next endpoint, so the default budget visits every
//!   endpoint twice

use std::time::Duration;

use crate::config::ProxyConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::upstream::UpstreamError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.direct_attempts(),
            config.retries.base_delay_ms,
            config.retries.max_delay_ms,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow a failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &UpstreamError) -> bool {
        attempt < self.max_attempts && is_retryable(error)
    }

    /// Delay before `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

/// Failures another endpoint might not have.
pub fn is_retryable(error: &UpstreamError) -> bool {
    matches!(error, UpstreamError::Transport(_))
}
