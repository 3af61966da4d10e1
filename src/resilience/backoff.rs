//! Exponential backoff with full jitter.

use std::time::Duration;
use rand::Rng;

/// Exponential delay for a 1-based attempt number, capped at `max`.
///
/// Attempt 0 means "no previous attempt" and yields no delay.
pub fn exponential_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);

    Duration::from_millis(delay_ms).min(max)
}

/// Calculate the backoff delay, optionally with full jitter.
///
/// With jitter the delay is drawn uniformly from `[0, computed]`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    let capped = exponential_delay(attempt, base, max);
    if !jitter || capped.is_zero() {
        return capped;
    }

    let upper = capped.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=upper))
}
