//! # Timeouts and Backoff
//!
//! Per-attempt timeout adaptation, response quality, and dial backoff.

use std::time::Duration;

/// Per-attempt timeout for a peer.
///
/// Seeded from `default` and tightened to `factor` times the peer's
/// expected latency, never below `min` and never above `default`.
pub fn adaptive_timeout(
    expected_latency: Option<Duration>,
    default: Duration,
    min: Duration,
    factor: f64,
) -> Duration {
    let min = min.min(default);
    match expected_latency {
        Some(latency) => latency.mul_f64(factor.max(1.0)).clamp(min, default),
        None => default,
    }
}

/// Quality of a valid response in (0, 1], falling with latency.
///
/// A response as slow as `reference` scores one half.
pub fn response_quality(latency: Duration, reference: Duration) -> f64 {
    let reference = reference.as_secs_f64().max(f64::EPSILON);
    reference / (reference + latency.as_secs_f64())
}

/// Delay before the next dial after `failures` consecutive failures.
///
/// `base * 2^(failures - 1)`, capped at `max`. Zero failures means no delay.
pub fn dial_backoff(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let shift = (failures - 1).min(31);
    base.saturating_mul(1u32 << shift).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_adaptive_timeout_without_history() {
        assert_eq!(adaptive_timeout(None, ms(10_000), ms(250), 3.0), ms(10_000));
    }

    #[test]
    fn test_adaptive_timeout_tightens() {
        assert_eq!(
            adaptive_timeout(Some(ms(200)), ms(10_000), ms(250), 3.0),
            ms(600)
        );
        assert_eq!(
            adaptive_timeout(Some(ms(10)), ms(10_000), ms(250), 3.0),
            ms(250)
        );
        assert_eq!(
            adaptive_timeout(Some(ms(9_000)), ms(10_000), ms(250), 3.0),
            ms(10_000)
        );
    }

    #[test]
    fn test_response_quality_falls_with_latency() {
        let reference = ms(500);
        let fast = response_quality(ms(10), reference);
        let slow = response_quality(ms(5_000), reference);
        assert!(fast > slow);
        assert!((response_quality(reference, reference) - 0.5).abs() < 1e-9);
        assert!(fast <= 1.0 && slow > 0.0);
    }

    #[test]
    fn test_dial_backoff_doubles_to_ceiling() {
        let base = ms(1_000);
        let max = ms(60_000);
        assert_eq!(dial_backoff(0, base, max), Duration::ZERO);
        assert_eq!(dial_backoff(1, base, max), ms(1_000));
        assert_eq!(dial_backoff(3, base, max), ms(4_000));
        assert_eq!(dial_backoff(10, base, max), max);
        assert_eq!(dial_backoff(u32::MAX, base, max), max);
    }
}
