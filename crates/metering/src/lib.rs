//! GPU-free half of the auto-exposure pipeline.
//!
//! The renderer owns the GPU passes; everything that decides *what* those
//! passes do lives here so it can be exercised without a device:
//!
//! ```text
//!   readback ──▶ Aggregator ──▶ SharedExposure.target
//!                                      │
//!   PassScheduler::plan_frame ─────────┴─▶ ExposureState::advance ─▶ FramePlan
//! ```
//!
//! - `state` holds the shared exposure cell (atomics, so the readback path and
//!   host diagnostics never need a lock) and the frame-loop owned state.
//! - `aggregate` folds per-group partial sums into a clamped target exposure.
//! - `controller` advances the current exposure toward the target.
//! - `scheduler` throttles reduction dispatches and emits per-frame plans.

mod aggregate;
mod controller;
mod scheduler;
mod state;

pub use aggregate::{
    perceptual_remap, Aggregator, DiscardReason, GroupPartial, ReadbackError, ReductionResult,
};
pub use controller::{exp_decay, linear_approach};
pub use scheduler::{FramePlan, PassScheduler, SchedulerStats};
pub use state::{ExposureReader, ExposureState, SharedExposure};
