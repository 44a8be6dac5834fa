use std::sync::{Arc, Weak};

use exposureconfig::ExposureConfig;
use tracing::trace;

use crate::state::SharedExposure;

/// Offset added to `log2(avg)` before scaling in [`perceptual_remap`].
const LOG_OFFSET: f32 = 2.4;
/// Scale applied to the offset log luminance in [`perceptual_remap`].
const LOG_SCALE: f32 = 0.370_370_4;

/// One reduction group's contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupPartial {
    pub luminance_sum: f64,
    pub pixel_count: u32,
}

/// Per-group partial sums produced by one reduction dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReductionResult {
    partials: Vec<GroupPartial>,
}

impl ReductionResult {
    /// Wraps partials that were already decoded.
    pub fn new(partials: Vec<GroupPartial>) -> Self {
        Self { partials }
    }

    /// Builds a result from the interleaved `[sum, count, sum, count, ..]`
    /// scalars the reduction kernel writes.
    ///
    /// Counts travel as floats, so they are rounded up to whole pixels; a
    /// trailing unpaired scalar is ignored.
    pub fn from_scalars(scalars: &[f32]) -> Self {
        let partials = scalars
            .chunks_exact(2)
            .map(|pair| GroupPartial {
                luminance_sum: f64::from(pair[0]),
                // `as` saturates: negative and NaN counts become zero.
                pixel_count: pair[1].ceil() as u32,
            })
            .collect();
        Self { partials }
    }

    /// Partials in dispatch order, one per workgroup.
    pub fn partials(&self) -> &[GroupPartial] {
        &self.partials
    }

    /// Sum of luminance over every group.
    pub fn total_luminance(&self) -> f64 {
        self.partials.iter().map(|group| group.luminance_sum).sum()
    }

    /// Sum of pixel counts over every group.
    pub fn total_pixels(&self) -> u64 {
        self.partials
            .iter()
            .map(|group| u64::from(group.pixel_count))
            .sum()
    }

    /// Mean linear luminance over every counted pixel, or `None` when the
    /// dispatch covered no pixels.
    pub fn mean_luminance(&self) -> Option<f64> {
        let pixels = self.total_pixels();
        if pixels == 0 {
            return None;
        }
        Some(self.total_luminance() / pixels as f64)
    }
}

/// Perceptual brightness curve: a log-domain ramp floored by the linear value.
///
/// The constants are empirically tuned; keep them as they are.
pub fn perceptual_remap(avg: f32) -> f32 {
    ((avg.log2() + LOG_OFFSET) * LOG_SCALE).max(avg)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadbackError {
    #[error("failed to map readback buffer: {0}")]
    Map(String),
    #[error("readback #{sequence} superseded by #{latest}")]
    Superseded { sequence: u64, latest: u64 },
}

/// Why a readback did not produce a new target exposure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiscardReason {
    #[error(transparent)]
    Readback(#[from] ReadbackError),
    #[error("exposure state has been torn down")]
    Detached,
    #[error("auto exposure is inactive")]
    Inactive,
    #[error("reduction covered no pixels")]
    NoPixels,
    #[error("mean luminance is not a number")]
    NotANumber,
}

/// Turns completed readbacks into target exposures.
///
/// Holds only a weak link to the shared state, so a readback that completes
/// after the feature was disposed cannot bring the state back.
#[derive(Debug, Clone)]
pub struct Aggregator {
    target: Weak<SharedExposure>,
}

impl Aggregator {
    /// Aggregator writing into `shared` for as long as it is alive.
    pub fn new(shared: &Arc<SharedExposure>) -> Self {
        Self {
            target: Arc::downgrade(shared),
        }
    }

    pub(crate) fn from_weak(target: Weak<SharedExposure>) -> Self {
        Self { target }
    }

    /// Folds one readback into the target exposure and returns the stored value.
    pub fn consume(
        &self,
        readback: Result<ReductionResult, ReadbackError>,
        config: Option<&ExposureConfig>,
    ) -> Result<f32, DiscardReason> {
        let outcome = self.try_consume(readback, config);
        if let Err(reason) = &outcome {
            trace!(%reason, "discarded luminance readback");
        }
        outcome
    }

    fn try_consume(
        &self,
        readback: Result<ReductionResult, ReadbackError>,
        config: Option<&ExposureConfig>,
    ) -> Result<f32, DiscardReason> {
        let result = readback?;
        let shared = self.target.upgrade().ok_or(DiscardReason::Detached)?;
        if shared.is_detached() {
            return Err(DiscardReason::Detached);
        }
        let config = config
            .filter(|config| config.active)
            .ok_or(DiscardReason::Inactive)?;

        let avg = result.mean_luminance().ok_or(DiscardReason::NoPixels)? as f32;
        if avg.is_nan() {
            return Err(DiscardReason::NotANumber);
        }

        let target = config
            .global_exposure_range
            .clamp(perceptual_remap(avg));
        if !shared.store_target(target) {
            return Err(DiscardReason::NotANumber);
        }
        trace!(avg, target, groups = result.partials().len(), "updated target exposure");
        Ok(target)
    }
}
