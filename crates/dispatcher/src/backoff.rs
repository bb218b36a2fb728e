//! Exponential backoff with jitter

use std::time::Duration;

use contracts::BackoffConfig;
use rand::Rng;

/// Delay before retry number `attempt + 1` (`attempt` counts from 0).
///
/// `min(base * 2^attempt, max)`, scaled by a uniform factor in
/// `[1 - jitter, 1 + jitter]`, then clamped to `[0, max]`.
pub fn delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let spread = if config.jitter > 0.0 {
        rand::rng().random_range(-1.0..=1.0)
    } else {
        0.0
    };
    delay_with_spread(config, attempt, spread)
}

/// Deterministic core of [`delay`]; `spread` is in `[-1, 1]`
pub(crate) fn delay_with_spread(config: &BackoffConfig, attempt: u32, spread: f64) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let raw = config.base.saturating_mul(factor).min(config.max);

    let jitter = config.jitter.clamp(0.0, 1.0) * spread.clamp(-1.0, 1.0);
    if jitter == 0.0 {
        return raw;
    }
    let jittered = raw.as_secs_f64() * (1.0 + jitter);
    if !jittered.is_finite() || jittered <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(jittered).min(config.max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let config = config(0.0);
        let delays: Vec<u128> = (0..4)
            .map(|attempt| delay(&config, attempt).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_capped_at_max() {
        let config = config(0.0);
        assert_eq!(delay(&config, 4), Duration::from_millis(1_000));
        assert_eq!(delay(&config, 31), Duration::from_millis(1_000));
        assert_eq!(delay(&config, u32::MAX), Duration::from_millis(1_000));
    }

    fn assert_close(actual: Duration, expected_ms: f64) {
        let actual_ms = actual.as_secs_f64() * 1_000.0;
        assert!((actual_ms - expected_ms).abs() < 1e-3, "{actual_ms} != {expected_ms}");
    }

    #[test]
    fn test_jitter_bounds() {
        let config = config(0.2);
        assert_close(delay_with_spread(&config, 1, -1.0), 160.0);
        assert_close(delay_with_spread(&config, 1, 1.0), 240.0);
        // upward jitter never exceeds the ceiling
        assert_eq!(
            delay_with_spread(&config, 5, 1.0),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_random_jitter_stays_in_range() {
        let config = config(0.5);
        for _ in 0..200 {
            let ms = delay(&config, 0).as_secs_f64() * 1_000.0;
            assert!((49.999..=150.001).contains(&ms), "{ms}");
        }
    }

    #[test]
    fn test_full_downward_jitter_is_zero() {
        let config = config(1.0);
        assert_eq!(delay_with_spread(&config, 0, -1.0), Duration::ZERO);
    }
}
