//! Wait computation between poll attempts
//!
//! Pure functions over a [`RetryPolicy`]. The workflow calls these while
//! replaying, so they must never read the clock or draw random numbers.

use std::time::Duration;

use crate::request::RetryPolicy;

/// Largest delay a durable timer can carry
///
/// Timer durations are persisted as whole milliseconds in a `u64`, so any
/// longer wait is clamped here to keep replay comparisons exact.
pub const MAX_TIMER_DELAY: Duration = Duration::from_millis(u64::MAX);

/// Convert a seconds value into a timer delay
///
/// Negative and NaN values become zero; values too large for a timer
/// saturate at [`MAX_TIMER_DELAY`].
pub fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value)
        .unwrap_or(MAX_TIMER_DELAY)
        .min(MAX_TIMER_DELAY)
}

/// Wait before the given attempt
///
/// Attempt 0 is the optional start-delay attempt. Every other attempt waits
/// `initial * attempt^coefficient`, capped at the policy's max delay when one
/// is set.
pub fn next_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 && policy.start_delay_seconds > 0.0 {
        return seconds(policy.start_delay_seconds);
    }

    let attempt = f64::from(attempt.max(1));
    let mut delay = policy.initial_delay_seconds * attempt.powf(policy.backoff_coefficient);
    if policy.max_delay_seconds > 0.0 {
        delay = delay.min(policy.max_delay_seconds);
    }
    if !delay.is_finite() {
        return MAX_TIMER_DELAY;
    }
    seconds(delay)
}

/// First wait of a run together with the attempt it precedes
pub fn first_delay(policy: &RetryPolicy) -> (u32, Duration) {
    let attempt = if policy.start_delay_seconds > 0.0 { 0 } else { 1 };
    (attempt, next_delay(attempt, policy))
}
