use std::time::Instant;

use exposureconfig::ExposureConfig;

use crate::aggregate::Aggregator;
use crate::state::{ExposureReader, ExposureState};

/// Passes to run for one frame, decided by [`PassScheduler::plan_frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    /// Issue a luminance reduction this frame.
    pub dispatch_reduction: bool,
    /// Smoothed exposure the tone-map pass should use.
    pub exposure: f32,
    /// Perceptual range forwarded to the shading function.
    pub exposure_range: [f32; 2],
    pub white_point: f32,
}

/// Running totals, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames planned while active.
    pub frames: u64,
    /// Reductions the throttle asked for. The renderer may still skip one
    /// when its readback ring is full.
    pub dispatches_planned: u64,
}

/// Throttles the reduction pass and drives the per-frame exposure update.
#[derive(Debug)]
pub struct PassScheduler {
    state: ExposureState,
    stats: SchedulerStats,
}

impl PassScheduler {
    /// Fresh scheduler with zeroed exposure state.
    pub fn new(now: Instant) -> Self {
        Self {
            state: ExposureState::new(now),
            stats: SchedulerStats::default(),
        }
    }

    /// Exposure state driven by this scheduler.
    pub fn state(&self) -> &ExposureState {
        &self.state
    }

    /// Mutable access, e.g. to [`ExposureState::reset`] the exposure.
    pub fn state_mut(&mut self) -> &mut ExposureState {
        &mut self.state
    }

    /// Totals since creation.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Aggregator wired to this scheduler's shared exposure.
    pub fn aggregator(&self) -> Aggregator {
        Aggregator::from_weak(self.state.downgrade())
    }

    /// Read-only handle on the shared exposure.
    pub fn reader(&self) -> ExposureReader {
        self.state.reader()
    }

    /// Decides this frame's passes, then advances the smoothed exposure.
    ///
    /// The tone-map pass gets the exposure as it stood *before* this frame's
    /// update. Returns `None` without touching any state when the
    /// configuration is missing or inactive.
    pub fn plan_frame(&mut self, config: Option<&ExposureConfig>, now: Instant) -> Option<FramePlan> {
        let config = config.filter(|config| config.active)?;

        let dispatch_reduction = self.state.frame_skip_counter % config.compute_interval() == 0;
        if dispatch_reduction {
            self.state.frame_skip_counter = 0;
            self.stats.dispatches_planned += 1;
        }
        self.state.frame_skip_counter += 1;
        self.stats.frames += 1;

        let plan = FramePlan {
            dispatch_reduction,
            exposure: self.state.current_exposure(),
            exposure_range: config.exposure_range.as_array(),
            white_point: config.white_point,
        };

        self.state.advance(config, now);
        Some(plan)
    }

    /// Tears the shared state down so in-flight readbacks become no-ops.
    pub fn detach(&self) {
        self.state.shared().detach();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::aggregate::{GroupPartial, ReductionResult};

    fn config_with_interval(frames_per_compute: u32) -> ExposureConfig {
        ExposureConfig {
            frames_per_compute,
            ..ExposureConfig::default()
        }
    }

    fn run_frames(scheduler: &mut PassScheduler, config: &ExposureConfig, frames: u32) -> (u32, u32) {
        let mut now = Instant::now();
        let mut dispatches = 0;
        let mut applied = 0;
        for _ in 0..frames {
            now += Duration::from_millis(16);
            if let Some(plan) = scheduler.plan_frame(Some(config), now) {
                applied += 1;
                if plan.dispatch_reduction {
                    dispatches += 1;
                }
            }
        }
        (dispatches, applied)
    }

    #[test]
    fn throttles_dispatches_to_interval() {
        for interval in 1..=7u32 {
            for frames in [1u32, 2, 5, 9, 10, 31, 64] {
                let mut scheduler = PassScheduler::new(Instant::now());
                let config = config_with_interval(interval);
                let (dispatches, applied) = run_frames(&mut scheduler, &config, frames);
                assert_eq!(dispatches, frames.div_ceil(interval), "K={interval} N={frames}");
                assert_eq!(applied, frames);
                assert_eq!(scheduler.stats().dispatches_planned, u64::from(dispatches));
                assert_eq!(scheduler.stats().frames, u64::from(frames));
            }
        }
    }

    #[test]
    fn first_frame_dispatches() {
        let mut scheduler = PassScheduler::new(Instant::now());
        let plan = scheduler
            .plan_frame(Some(&config_with_interval(5)), Instant::now())
            .expect("active");
        assert!(plan.dispatch_reduction);
        assert_eq!(scheduler.state().frame_skip_counter(), 1);
    }

    #[test]
    fn counter_wraps_within_interval() {
        let mut scheduler = PassScheduler::new(Instant::now());
        let config = config_with_interval(3);
        let mut now = Instant::now();
        for _ in 0..20 {
            now += Duration::from_millis(16);
            scheduler.plan_frame(Some(&config), now);
            let counter = scheduler.state().frame_skip_counter();
            assert!((1..=3).contains(&counter), "counter {counter}");
        }
    }

    #[test]
    fn inactive_config_schedules_nothing() {
        let start = Instant::now();
        let mut scheduler = PassScheduler::new(start);
        let config = ExposureConfig {
            active: false,
            ..ExposureConfig::default()
        };
        let later = start + Duration::from_secs(1);
        assert_eq!(scheduler.plan_frame(Some(&config), later), None);
        assert_eq!(scheduler.plan_frame(None, later), None);
        assert_eq!(scheduler.state().frame_skip_counter(), 0);
        assert_eq!(scheduler.state().last_update(), start);
        assert_eq!(scheduler.stats(), SchedulerStats::default());
    }

    #[test]
    fn plan_carries_pre_update_exposure() {
        let start = Instant::now();
        let mut scheduler = PassScheduler::new(start);
        let config = ExposureConfig::default();
        scheduler
            .aggregator()
            .consume(
                Ok(ReductionResult::new(vec![GroupPartial {
                    luminance_sum: 400.0,
                    pixel_count: 100,
                }])),
                Some(&config),
            )
            .expect("target stored");

        let plan = scheduler
            .plan_frame(Some(&config), start + Duration::from_millis(100))
            .expect("active");
        assert_eq!(plan.exposure, 0.0);
        assert_eq!(plan.exposure_range, [-2.5, 0.6]);
        assert_eq!(plan.white_point, 3.0);

        let updated = scheduler.state().current_exposure();
        assert!(updated > 0.0 && updated < 4.0, "{updated}");
        let next = scheduler
            .plan_frame(Some(&config), start + Duration::from_millis(116))
            .expect("active");
        assert_eq!(next.exposure, updated);
    }

    #[test]
    fn detached_scheduler_ignores_readbacks() {
        let scheduler = PassScheduler::new(Instant::now());
        let aggregator = scheduler.aggregator();
        let reader = scheduler.reader();
        scheduler.detach();
        let outcome = aggregator.consume(
            Ok(ReductionResult::from_scalars(&[50.0, 10.0])),
            Some(&ExposureConfig::default()),
        );
        assert!(outcome.is_err());
        assert_eq!(reader.target(), 0.0);
    }
}
