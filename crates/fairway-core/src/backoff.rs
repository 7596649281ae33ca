//! # Retry Backoff
//!
//! Exponential backoff with bounded jitter for pending-change retries.
//!
//! ```text
//! delay(retries) = min(base * 2^retries, max)
//! jittered       = delay + delay * jitter_ratio * sample     (sample ∈ [0, 1])
//!
//! base = 5s, max = 5min, jitter = 30%
//!   retries 1 →  10s .. 13s
//!   retries 2 →  20s .. 26s
//!   retries 3 →  40s .. 52s
//!   ...
//!   cap       → 300s .. 390s
//! ```
//!
//! The jitter sample is supplied by the caller so this stays deterministic.

use serde::{Deserialize, Serialize};

/// Backoff parameters for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay added at most as jitter (0.3 = up to +30%).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            jitter_ratio: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Delay before jitter: `min(base * 2^retries, max)`.
    pub fn base_delay(&self, retries: u32) -> u64 {
        let factor = 2u64.checked_pow(retries).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Delay including jitter for a sample in `[0, 1]`.
    pub fn delay_ms(&self, retries: u32, jitter_sample: f64) -> u64 {
        let delay = self.base_delay(retries);
        let sample = if jitter_sample.is_finite() {
            jitter_sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jitter = (delay as f64 * self.jitter_ratio.max(0.0) * sample).round() as u64;
        delay.saturating_add(jitter)
    }

    /// Absolute time before which the next retry must not run.
    pub fn next_retry_at(&self, now: i64, retries: u32, jitter_sample: f64) -> i64 {
        let delay = i64::try_from(self.delay_ms(retries, jitter_sample)).unwrap_or(i64::MAX);
        now.saturating_add(delay)
    }

    /// Largest delay this policy can produce.
    pub fn ceiling_ms(&self) -> u64 {
        self.delay_ms(u32::MAX, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_until_cap() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter_ratio: 0.3,
        };
        assert_eq!(policy.base_delay(0), 1_000);
        assert_eq!(policy.base_delay(1), 2_000);
        assert_eq!(policy.base_delay(3), 8_000);
        assert_eq!(policy.base_delay(4), 10_000);
        assert_eq!(policy.base_delay(200), 10_000);
    }

    #[test]
    fn test_delay_is_monotonic_and_bounded() {
        let policy = RetryPolicy::default();
        let ceiling = (policy.max_delay_ms as f64 * 1.3).round() as u64;

        for sample in [0.0, 0.25, 0.5, 1.0] {
            let mut previous = 0;
            for retries in 1..=20 {
                let delay = policy.delay_ms(retries, sample);
                assert!(delay >= previous, "retries {retries} sample {sample}");
                assert!(delay <= ceiling);
                previous = delay;
            }
        }
        assert_eq!(policy.ceiling_ms(), ceiling);
    }

    #[test]
    fn test_jitter_is_within_thirty_percent() {
        let policy = RetryPolicy::default();
        let plain = policy.delay_ms(2, 0.0);
        let full = policy.delay_ms(2, 1.0);
        assert_eq!(plain, 20_000);
        assert_eq!(full, 26_000);
        assert_eq!(policy.delay_ms(2, 7.0), full);
        assert_eq!(policy.delay_ms(2, f64::NAN), plain);
    }

    #[test]
    fn test_next_retry_at() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ratio: 0.0,
        };
        assert_eq!(policy.next_retry_at(5_000, 1, 0.9), 5_200);
    }
}
