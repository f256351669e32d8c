//! Reconnect backoff policy.
//!
//! Exponential backoff with full jitter:
//!
//! ```text
//! delay = min(max_delay, base * 2^attempt) * rand(0.5, 1.0)
//! ```
//!
//! The jitter spreads a fleet-wide disconnect (game maintenance, network
//! blip) so the reconnect stampede does not arrive as one burst.

use rand::Rng;
use std::time::Duration;

/// Computes the backoff delay for the given zero-based attempt.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    let capped = base.saturating_mul(factor).min(max);
    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
    capped.mul_f64(jitter)
}

/// Upper bound of the delay for the given attempt (the un-jittered value).
pub fn delay_ceiling(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(30);
    const MAX: Duration = Duration::from_secs(600);

    #[test]
    fn test_delay_within_jitter_bounds() {
        for attempt in 0..10 {
            let ceiling = delay_ceiling(attempt, BASE, MAX);
            for _ in 0..50 {
                let delay = reconnect_delay(attempt, BASE, MAX);
                assert!(
                    delay >= ceiling.mul_f64(0.5),
                    "attempt {}: {:?} below jitter floor",
                    attempt,
                    delay
                );
                assert!(
                    delay <= ceiling,
                    "attempt {}: {:?} above ceiling",
                    attempt,
                    delay
                );
            }
        }
    }

    #[test]
    fn test_first_three_attempts_match_expected_windows() {
        // base=30s: attempt 0 in [15s,30s], 1 in [30s,60s], 2 in [60s,120s]
        let windows = [(15, 30), (30, 60), (60, 120)];
        for (attempt, (lo, hi)) in windows.iter().enumerate() {
            for _ in 0..50 {
                let delay = reconnect_delay(attempt as u32, BASE, MAX);
                assert!(delay >= Duration::from_secs(*lo));
                assert!(delay <= Duration::from_secs(*hi));
            }
        }
    }

    #[test]
    fn test_ceiling_caps_at_max() {
        assert_eq!(delay_ceiling(0, BASE, MAX), Duration::from_secs(30));
        assert_eq!(delay_ceiling(4, BASE, MAX), Duration::from_secs(480));
        // 30s * 2^5 = 960s, capped to 600s
        assert_eq!(delay_ceiling(5, BASE, MAX), MAX);
        assert_eq!(delay_ceiling(9, BASE, MAX), MAX);
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let delay = delay_ceiling(u32::MAX, BASE, MAX);
        assert_eq!(delay, MAX);
    }
}
