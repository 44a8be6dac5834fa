//! wgpu integration for the auto-exposure pipeline.
//!
//! The host hands over its color frame once per frame; the crate meters it,
//! folds finished readbacks into the shared exposure, and tone maps the frame
//! in place:
//!
//! ```text
//!   host frame ──▶ LuminanceReducer ──▶ ReadbackRing ──(map_async)──▶ Aggregator
//!       │                                                               │
//!       │                   PassScheduler::plan_frame ◀── SharedExposure.target
//!       │                              │ FramePlan
//!       ▼                              ▼
//!   ToneMapApplier (frame ─tone_map─▶ scratch ─blit─▶ frame)
//! ```
//!
//! [`AutoExposureFeature`] is the only entry point a host needs. It owns the
//! GPU passes, while the decisions (throttling, smoothing, aggregation) come
//! from the GPU-free `metering` crate. The host's shading function plugs in
//! through [`ToneMapShader`]; its WGSL is wrapped with our bindings and
//! validated with naga before any pipeline is built.

mod compile;
mod feature;
mod gpu;
mod types;

pub use compile::{ReinhardToneMap, ToneMapShader, WgslToneMap};
pub use feature::AutoExposureFeature;
pub use gpu::{
    create_frame_texture, read_frame_rgba8, upload_image, GpuContext, FRAME_FORMAT,
};
pub use types::{
    AdapterProfile, CapabilityError, FrameReport, FrameTarget, GpuMemoryMode, GpuPowerPreference,
};
