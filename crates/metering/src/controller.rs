use std::time::Instant;

use exposureconfig::{ExposureConfig, SmoothingMode};

use crate::state::ExposureState;

/// Frame-rate independent approach from `a` toward `b`.
///
/// Closes the same fraction of the gap over a fixed wall-clock interval no
/// matter how many steps it is split into. Returns `a` for `dt <= 0` and never
/// leaves the closed interval between `a` and `b`.
pub fn exp_decay(a: f32, b: f32, decay: f32, dt: f32) -> f32 {
    if dt.is_nan() || dt <= 0.0 {
        return a;
    }
    let next = b + (a - b) * (-decay * dt).exp();
    next.max(a.min(b)).min(a.max(b))
}

/// Constant-rate approach from `a` toward `b`, at most `rise * dt` upward or
/// `fall * dt` downward per call.
pub fn linear_approach(a: f32, b: f32, rise: f32, fall: f32, dt: f32) -> f32 {
    if dt.is_nan() || dt <= 0.0 {
        return a;
    }
    let diff = b - a;
    let step = if diff > 0.0 {
        diff.min(rise * dt)
    } else {
        diff.max(-fall * dt)
    };
    a + step
}

impl ExposureState {
    /// Advances the current exposure toward the target and returns it.
    ///
    /// Runs once per frame the feature executes. The timestamp moves on even
    /// when there is nothing to do, so a long idle stretch does not turn into
    /// one huge step later.
    pub fn advance(&mut self, config: &ExposureConfig, now: Instant) -> f32 {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f32();
        self.last_update = now;

        let target = self.shared.target();
        let current = self.shared.current();
        let diff = target - current;
        if diff == 0.0 {
            return current;
        }

        let next = match config.smoothing {
            SmoothingMode::Exponential => {
                let decay = if diff > 0.0 {
                    config.increase_speed
                } else {
                    config.decrease_speed
                };
                exp_decay(current, target, decay, dt)
            }
            SmoothingMode::Linear => linear_approach(
                current,
                target,
                config.increase_speed,
                config.decrease_speed,
                dt,
            ),
        };
        self.shared.store_current(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn state_with(current: f32, target: f32, start: Instant) -> ExposureState {
        let mut state = ExposureState::new(start);
        state.reset(current, start);
        state.shared.store_target(target);
        state
    }

    #[test]
    fn decay_stays_between_endpoints() {
        let cases = [(0.0, 5.0), (5.0, 0.0), (-1.0, 3.5), (0.1, 0.3), (7.0, 7.0)];
        for (a, b) in cases {
            for decay in [0.1, 1.0, 5.0, 50.0] {
                for dt in [0.0, 1.0e-4, 0.016, 0.5, 3.0, 100.0] {
                    let value = exp_decay(a, b, decay, dt);
                    assert!(
                        value >= a.min(b) && value <= a.max(b),
                        "exp_decay({a}, {b}, {decay}, {dt}) = {value}"
                    );
                }
            }
        }
    }

    #[test]
    fn decay_hits_endpoints_at_limits() {
        assert_eq!(exp_decay(0.1, 0.3, 5.0, 0.0), 0.1);
        assert_eq!(exp_decay(0.1, 0.3, 5.0, -1.0), 0.1);
        assert_eq!(exp_decay(0.1, 0.3, 5.0, f32::INFINITY), 0.3);
        assert_eq!(exp_decay(0.0, 5.0, 5.0, 1.0e6), 5.0);
    }

    #[test]
    fn decay_matches_reference_value() {
        // 5 + (0 - 5) * e^-5
        let value = exp_decay(0.0, 5.0, 5.0, 1.0);
        assert!((value - 4.966_310_5).abs() < 1e-4, "{value}");
    }

    #[test]
    fn decay_is_frame_rate_independent() {
        let coarse = exp_decay(0.0, 5.0, 3.0, 0.5);
        let mut fine = 0.0;
        for _ in 0..50 {
            fine = exp_decay(fine, 5.0, 3.0, 0.01);
        }
        assert!((coarse - fine).abs() < 1e-4, "{coarse} vs {fine}");
    }

    #[test]
    fn advance_uses_increase_speed_when_brightening() {
        let start = Instant::now();
        let mut state = state_with(0.0, 5.0, start);
        let config = ExposureConfig {
            increase_speed: 5.0,
            decrease_speed: 0.5,
            ..ExposureConfig::default()
        };
        let value = state.advance(&config, start + Duration::from_secs(1));
        assert!((value - 4.966).abs() < 1e-3, "{value}");
        assert_eq!(state.current_exposure(), value);
        assert_eq!(state.last_update(), start + Duration::from_secs(1));
    }

    #[test]
    fn advance_uses_decrease_speed_when_darkening() {
        let start = Instant::now();
        let mut state = state_with(5.0, 0.0, start);
        let config = ExposureConfig {
            increase_speed: 50.0,
            decrease_speed: 1.0,
            ..ExposureConfig::default()
        };
        let value = state.advance(&config, start + Duration::from_secs(1));
        // 5 * e^-1
        assert!((value - 1.839_397).abs() < 1e-3, "{value}");
    }

    #[test]
    fn advance_is_noop_at_target_but_moves_clock() {
        let start = Instant::now();
        let mut state = state_with(2.0, 2.0, start);
        let later = start + Duration::from_millis(250);
        assert_eq!(state.advance(&ExposureConfig::default(), later), 2.0);
        assert_eq!(state.last_update(), later);
    }

    #[test]
    fn approach_is_monotonic_without_overshoot() {
        let start = Instant::now();
        let config = ExposureConfig::default();
        for (from, to) in [(0.0, 5.0), (12.0, 0.5)] {
            let mut state = state_with(from, to, start);
            let mut now = start;
            let mut gap = (to - from).abs();
            let mut steps = 0;
            while gap > 1.0e-4 {
                now += Duration::from_millis(16);
                let value = state.advance(&config, now);
                let next_gap = (value - to).abs();
                assert!(next_gap < gap, "gap grew from {gap} to {next_gap}");
                assert!(value >= from.min(to) && value <= from.max(to));
                gap = next_gap;
                steps += 1;
                assert!(steps < 10_000, "did not converge");
            }
        }
    }

    #[test]
    fn linear_mode_caps_step_per_second() {
        let start = Instant::now();
        let config = ExposureConfig {
            smoothing: SmoothingMode::Linear,
            increase_speed: 2.0,
            decrease_speed: 4.0,
            ..ExposureConfig::default()
        };
        let mut state = state_with(0.0, 5.0, start);
        let value = state.advance(&config, start + Duration::from_millis(500));
        assert!((value - 1.0).abs() < 1e-5, "{value}");

        let mut state = state_with(5.0, 0.0, start);
        let value = state.advance(&config, start + Duration::from_millis(500));
        assert!((value - 3.0).abs() < 1e-5, "{value}");

        let mut state = state_with(0.0, 0.25, start);
        let value = state.advance(&config, start + Duration::from_secs(1));
        assert_eq!(value, 0.25);
    }
}
