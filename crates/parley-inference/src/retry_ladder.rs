//! Generation parameter overrides per retry attempt.
//!
//! Providers cache completions keyed on the exact request parameters, so a
//! retry with identical parameters can return the identical (duplicate)
//! response. Each rung of the ladder perturbs the request harder:
//!
//! | Attempt | Temperature | Frequency penalty | History |
//! |---------|-------------|-------------------|---------|
//! | 1 | persona default | persona default | full |
//! | 2 | uniform in [0.95, 1.0] | 0.5 | full |
//! | 3+ | uniform in [0.95, 1.0] | 0.5 | oldest 30% dropped |

use rand::Rng;

use parley_core::defaults::{
    RETRY_FREQUENCY_PENALTY, RETRY_HISTORY_REDUCTION, RETRY_TEMPERATURE_MAX,
    RETRY_TEMPERATURE_MIN,
};
use parley_core::GenerationOverrides;

/// Overrides for the given 1-based attempt, jittered with the thread RNG.
pub fn build_retry_config(attempt: u32) -> GenerationOverrides {
    build_retry_config_with_rng(attempt, &mut rand::thread_rng())
}

/// Overrides for the given 1-based attempt, jittered with the supplied RNG.
pub fn build_retry_config_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    rng: &mut R,
) -> GenerationOverrides {
    if attempt <= 1 {
        return GenerationOverrides::default();
    }

    GenerationOverrides {
        temperature: Some(rng.gen_range(RETRY_TEMPERATURE_MIN..=RETRY_TEMPERATURE_MAX)),
        frequency_penalty: Some(RETRY_FREQUENCY_PENALTY),
        history_reduction: (attempt >= 3).then_some(RETRY_HISTORY_REDUCTION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_first_attempt_has_no_overrides() {
        let overrides = build_retry_config(1);
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        assert!(build_retry_config(0).is_empty());
    }

    #[test]
    fn test_second_attempt_jitters_temperature_and_penalizes_frequency() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let overrides = build_retry_config_with_rng(2, &mut rng);
            let temp = overrides.temperature.unwrap();
            assert!((0.95..=1.0).contains(&temp), "temperature {temp} out of range");
            assert_eq!(overrides.frequency_penalty, Some(0.5));
            assert_eq!(overrides.history_reduction, None);
        }
    }

    #[test]
    fn test_temperature_is_not_fixed() {
        let mut rng = StdRng::seed_from_u64(42);
        let temps: Vec<f32> = (0..20)
            .filter_map(|_| build_retry_config_with_rng(2, &mut rng).temperature)
            .collect();
        assert!(temps.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_third_attempt_reduces_history() {
        let overrides = build_retry_config(3);
        assert!(overrides.temperature.is_some());
        assert_eq!(overrides.frequency_penalty, Some(0.5));
        assert_eq!(overrides.history_reduction, Some(0.3));
    }

    #[test]
    fn test_later_attempts_match_third() {
        let overrides = build_retry_config(5);
        assert_eq!(overrides.history_reduction, Some(0.3));
        assert_eq!(overrides.frequency_penalty, Some(0.5));
    }
}
