//! Capped exponential backoff with full jitter.
//!
//! The delay before retry `n` is drawn uniformly from
//! `[0, min(cap, base * 2^n)]`.

use std::time::Duration;

/// Returns `base_ms * 2^attempt`, saturating at `u64::MAX`.
#[must_use]
pub const fn backoff_ceiling(base_ms: u64, attempt: u32) -> u64 {
    let factor = match 1u64.checked_shl(attempt) {
        Some(value) => value,
        None => u64::MAX,
    };
    base_ms.saturating_mul(factor)
}

/// Maps `rand_value` onto `[0, ceiling]`.
#[must_use]
pub const fn sample_delay(rand_value: u64, ceiling: u64) -> u64 {
    match ceiling.checked_add(1) {
        None => rand_value,
        Some(span) => match rand_value.checked_rem(span) {
            Some(value) => value,
            None => 0,
        },
    }
}

/// Retry delay generator.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_ms: u64,
    cap_ms: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Creates a generator growing from `base` up to `cap`.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        let to_ms = |value: Duration| u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        Self {
            base_ms: to_ms(base),
            cap_ms: to_ms(cap),
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound for the next delay.
    #[must_use]
    pub fn next_ceiling(&self) -> Duration {
        let ceiling = backoff_ceiling(self.base_ms, self.attempt).min(self.cap_ms);
        Duration::from_millis(ceiling)
    }

    /// Returns the next jittered delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = backoff_ceiling(self.base_ms, self.attempt).min(self.cap_ms);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(sample_delay(rand::random::<u64>(), ceiling))
    }

    /// Starts over after a success.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}
