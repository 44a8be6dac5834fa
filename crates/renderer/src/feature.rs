use std::time::Instant;

use exposureconfig::ExposureConfig;
use metering::{Aggregator, ExposureReader, PassScheduler, SchedulerStats};
use tracing::{debug, info, trace, warn};

use crate::compile::ToneMapShader;
use crate::gpu::readback::{ReadbackRing, READBACK_SLOTS};
use crate::gpu::reduce::{self, LuminanceReducer};
use crate::gpu::tonemap::ToneMapApplier;
use crate::gpu::uniforms::ToneMapUniforms;
use crate::gpu::GpuContext;
use crate::types::{CapabilityError, FrameReport, FrameTarget};

/// GPU passes and CPU state of an active feature.
struct AutoExposure {
    reducer: LuminanceReducer,
    ring: ReadbackRing,
    applier: ToneMapApplier,
    scheduler: PassScheduler,
    aggregator: Aggregator,
    frame_warning_logged: bool,
}

impl AutoExposure {
    fn release(&mut self) {
        self.scheduler.detach();
        self.ring.destroy();
        self.reducer.destroy();
        self.applier.destroy();
    }
}

enum FeatureState {
    Active(Box<AutoExposure>),
    Disabled(CapabilityError),
    Disposed,
}

/// Auto-exposure for one host render loop.
///
/// Built with [`AutoExposureFeature::initialise`], which probes the device once
/// and either activates the feature or leaves it permanently disabled. Every
/// call afterwards is infallible: problems are logged, never returned.
pub struct AutoExposureFeature {
    device: wgpu::Device,
    queue: wgpu::Queue,
    state: FeatureState,
    reader: Option<ExposureReader>,
}

impl AutoExposureFeature {
    /// Probes `downlevel` for compute support, compiles `shader` and builds
    /// both passes. Any failure leaves the feature disabled for good and logs
    /// a single warning.
    pub fn initialise(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        downlevel: &wgpu::DownlevelCapabilities,
        shader: &dyn ToneMapShader,
        now: Instant,
    ) -> Self {
        let mut feature = Self {
            device: device.clone(),
            queue: queue.clone(),
            state: FeatureState::Disposed,
            reader: None,
        };
        let state = match feature.build(downlevel, shader, now) {
            Ok(active) => {
                info!(shader = shader.label(), "auto exposure active");
                feature.reader = Some(active.scheduler.reader());
                FeatureState::Active(Box::new(active))
            }
            Err(reason) => {
                warn!(%reason, "auto exposure disabled");
                FeatureState::Disabled(reason)
            }
        };
        feature.state = state;
        feature
    }

    /// Shorthand for [`initialise`](Self::initialise) on a headless context.
    pub fn from_context(context: &GpuContext, shader: &dyn ToneMapShader, now: Instant) -> Self {
        Self::initialise(
            &context.device,
            &context.queue,
            &context.downlevel,
            shader,
            now,
        )
    }

    fn build(
        &self,
        downlevel: &wgpu::DownlevelCapabilities,
        shader: &dyn ToneMapShader,
        now: Instant,
    ) -> Result<AutoExposure, CapabilityError> {
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(CapabilityError::ComputeUnsupported);
        }

        let applier = ToneMapApplier::new(&self.device, shader)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let reducer = LuminanceReducer::new(&self.device);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CapabilityError::Pipeline {
                stage: "luminance reduce",
                message: err.to_string(),
            });
        }

        let scheduler = PassScheduler::new(now);
        let aggregator = scheduler.aggregator();
        Ok(AutoExposure {
            reducer,
            ring: ReadbackRing::new(),
            applier,
            scheduler,
            aggregator,
            frame_warning_logged: false,
        })
    }

    /// True while the passes run; false once disabled or disposed.
    pub fn is_active(&self) -> bool {
        matches!(self.state, FeatureState::Active(_))
    }

    /// Why the feature turned itself off, if it did.
    pub fn disabled_reason(&self) -> Option<&CapabilityError> {
        match &self.state {
            FeatureState::Disabled(reason) => Some(reason),
            _ => None,
        }
    }

    /// Smoothed exposure, or `None` if the feature never became active.
    pub fn exposure(&self) -> Option<f32> {
        self.reader.as_ref().map(ExposureReader::current)
    }

    /// Handle on the shared exposure that outlives the feature; it reports
    /// detached after [`dispose`](Self::dispose).
    pub fn reader(&self) -> Option<ExposureReader> {
        self.reader.clone()
    }

    /// Scheduler totals while active.
    pub fn stats(&self) -> Option<SchedulerStats> {
        match &self.state {
            FeatureState::Active(active) => Some(active.scheduler.stats()),
            _ => None,
        }
    }

    /// Runs one exposure cycle on `frame`.
    ///
    /// Completed readbacks are folded into the target first, then the
    /// scheduler decides whether to dispatch a reduction, the tone map is
    /// applied with the exposure from before this frame's update, and the
    /// controller advances. A missing or inactive `config` makes this a no-op
    /// apart from draining readbacks.
    pub fn run_frame(
        &mut self,
        frame: FrameTarget<'_>,
        config: Option<&ExposureConfig>,
        now: Instant,
    ) -> FrameReport {
        let FeatureState::Active(active) = &mut self.state else {
            return FrameReport::default();
        };
        match Self::cycle(&self.device, &self.queue, active, frame, config, now) {
            Ok(report) => report,
            Err(reason) => {
                warn!(%reason, "auto exposure disabled");
                active.release();
                self.state = FeatureState::Disabled(reason);
                FrameReport::default()
            }
        }
    }

    fn cycle(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        active: &mut AutoExposure,
        frame: FrameTarget<'_>,
        config: Option<&ExposureConfig>,
        now: Instant,
    ) -> Result<FrameReport, CapabilityError> {
        let mut report = FrameReport::default();

        if let Err(err) = device.poll(wgpu::PollType::Poll) {
            trace!(%err, "device poll failed");
        }
        for readback in active.ring.drain() {
            match active.aggregator.consume(readback, config) {
                Ok(_) => report.readbacks_consumed += 1,
                Err(_) => report.readbacks_discarded += 1,
            }
        }
        report.target_exposure = active.scheduler.state().target_exposure();

        let is_active = config.is_some_and(|config| config.active);
        if is_active && !frame.is_usable() {
            if !active.frame_warning_logged {
                warn!(
                    format = ?frame.format(),
                    usage = ?frame.texture.usage(),
                    width = frame.width(),
                    height = frame.height(),
                    "frame cannot be metered; it needs a single-sampled float format with TEXTURE_BINDING and RENDER_ATTACHMENT"
                );
                active.frame_warning_logged = true;
            }
            return Ok(report);
        }

        let Some(plan) = active.scheduler.plan_frame(config, now) else {
            return Ok(report);
        };

        let (width, height) = (frame.width(), frame.height());
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("auto exposure encoder"),
        });

        let mut reserved_slot = None;
        if plan.dispatch_reduction {
            let size = reduce::output_size(height);
            match active.ring.reserve(device, size) {
                Some(ticket) => {
                    active
                        .reducer
                        .encode(device, queue, &mut encoder, &view, width, height, ticket.buffer);
                    trace!(
                        sequence = ticket.sequence,
                        slot = ticket.slot,
                        groups = reduce::group_count(height),
                        "dispatched luminance reduction"
                    );
                    reserved_slot = Some(ticket.slot);
                    report.dispatched = true;
                }
                None => {
                    debug!(slots = READBACK_SLOTS, "readback ring full; skipping reduction");
                    report.dispatch_skipped = true;
                }
            }
        }

        let uniforms = ToneMapUniforms::from_plan(&plan);
        if let Err(reason) =
            active
                .applier
                .encode(device, &mut encoder, frame.texture, &view, &uniforms)
        {
            if let Some(slot) = reserved_slot {
                active.ring.release(slot);
            }
            return Err(reason);
        }

        queue.submit(std::iter::once(encoder.finish()));
        if let Some(slot) = reserved_slot {
            active.ring.begin_map(slot);
        }

        report.applied = true;
        report.exposure = plan.exposure;
        trace!(
            exposure = plan.exposure,
            target = report.target_exposure,
            dispatched = report.dispatched,
            in_flight = active.ring.in_flight(),
            "auto exposure frame"
        );
        Ok(report)
    }

    /// Releases every GPU resource and detaches the shared exposure so late
    /// readbacks are ignored. Later calls do nothing.
    pub fn dispose(&mut self) {
        if let FeatureState::Active(mut active) =
            std::mem::replace(&mut self.state, FeatureState::Disposed)
        {
            active.release();
            debug!("auto exposure disposed");
        }
    }
}

impl Drop for AutoExposureFeature {
    fn drop(&mut self) {
        self.dispose();
    }
}
