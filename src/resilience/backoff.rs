//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before the given 1-based attempt. The first attempt never waits.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt <= 1 || base_ms == 0 {
        return Duration::ZERO;
    }

    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt - 2));
    let capped = delay_ms.min(max_ms);

    // Up to 10% on top.
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
