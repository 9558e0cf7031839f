//! Retry backoff calculation: `backoff(n) = min(MaxDelay, BaseDelay * 2^n * (1 +/- Jitter))`.

use rand::Rng;

use crate::config::QueueConfig;

/// Compute the delay before attempt `n` (0-indexed) is retried.
pub fn backoff_delay(config: &QueueConfig, attempt: u32) -> std::time::Duration {
    backoff_delay_with_rng(config, attempt, &mut rand::rng())
}

fn backoff_delay_with_rng(
    config: &QueueConfig,
    attempt: u32,
    rng: &mut impl Rng,
) -> std::time::Duration {
    let exp = 2f64.powi(attempt as i32);
    let base = config.base_delay_ms as f64 * exp;
    let jitter_span = base * config.jitter_factor;
    let jittered = base + rng.random_range(-jitter_span..=jitter_span);
    let clamped = jittered.clamp(0.0, config.max_delay_ms as f64);
    std::time::Duration::from_millis(clamped.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let config = QueueConfig {
            base_delay_ms: 100,
            max_retries: 10,
            max_delay_ms: 100_000,
            jitter_factor: 0.0,
            pending_timeout_secs: 30,
        };
        let mut rng = StepRng::new(0, 1);
        let d0 = backoff_delay_with_rng(&config, 0, &mut rng);
        let d1 = backoff_delay_with_rng(&config, 1, &mut rng);
        let d2 = backoff_delay_with_rng(&config, 2, &mut rng);
        assert_eq!(d0.as_millis(), 100);
        assert_eq!(d1.as_millis(), 200);
        assert_eq!(d2.as_millis(), 400);
    }

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let config = QueueConfig {
            base_delay_ms: 1000,
            max_retries: 20,
            max_delay_ms: 5_000,
            jitter_factor: 0.5,
            pending_timeout_secs: 30,
        };
        for attempt in 0..20 {
            let d = backoff_delay(&config, attempt);
            assert!(d.as_millis() <= 5_000, "attempt {attempt} gave {d:?}");
        }
    }

    #[test]
    fn backoff_never_negative() {
        let config = QueueConfig {
            base_delay_ms: 10,
            max_retries: 5,
            max_delay_ms: 100,
            jitter_factor: 5.0,
            pending_timeout_secs: 30,
        };
        for attempt in 0..5 {
            let d = backoff_delay(&config, attempt);
            assert!(d.as_millis() >= 0);
        }
    }
}
