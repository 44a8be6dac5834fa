use std::fmt;
use std::str::FromStr;

/// Which adapter class to prefer when several are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    /// Integrated or otherwise power-saving adapters.
    #[default]
    Low,
    /// Discrete adapters when present.
    High,
}

impl GpuPowerPreference {
    pub(crate) fn to_wgpu(self) -> wgpu::PowerPreference {
        match self {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        }
    }
}

impl FromStr for GpuPowerPreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "low-power" => Ok(GpuPowerPreference::Low),
            "high" | "high-performance" => Ok(GpuPowerPreference::High),
            other => Err(format!(
                "unknown GPU power preference '{other}' (expected 'low' or 'high')"
            )),
        }
    }
}

impl fmt::Display for GpuPowerPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuPowerPreference::Low => f.write_str("low"),
            GpuPowerPreference::High => f.write_str("high"),
        }
    }
}

/// Allocation strategy hint forwarded to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuMemoryMode {
    #[default]
    Balanced,
    Performance,
}

impl GpuMemoryMode {
    pub(crate) fn to_wgpu(self) -> wgpu::MemoryHints {
        match self {
            GpuMemoryMode::Balanced => wgpu::MemoryHints::MemoryUsage,
            GpuMemoryMode::Performance => wgpu::MemoryHints::Performance,
        }
    }
}

/// Summary of the adapter a [`GpuContext`](crate::GpuContext) was built on.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    /// Driver-reported adapter name.
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub max_texture_dimension_2d: u32,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
        }
    }

    /// True for CPU rasterisers such as llvmpipe or WARP.
    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}

/// The host's color texture for one frame.
///
/// The texture must carry `TEXTURE_BINDING | RENDER_ATTACHMENT`; the reduction
/// reads it and the tone-map blit writes the exposed result back into it.
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget<'a> {
    pub texture: &'a wgpu::Texture,
}

impl<'a> FrameTarget<'a> {
    /// Wraps the host's color texture for this frame.
    pub fn new(texture: &'a wgpu::Texture) -> Self {
        Self { texture }
    }

    /// Texture width in pixels.
    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    /// Texture height in pixels; sets the reduction group count.
    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// Texture format; pipelines are cached per format.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }

    pub(crate) fn is_usable(&self) -> bool {
        let required = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT;
        let float_sampled = matches!(
            self.format().sample_type(None, None),
            Some(wgpu::TextureSampleType::Float { .. })
        );
        self.texture.usage().contains(required)
            && float_sampled
            && self.texture.sample_count() == 1
            && self.width() > 0
            && self.height() > 0
    }
}

/// What one call to [`AutoExposureFeature::run_frame`](crate::AutoExposureFeature::run_frame)
/// did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    /// The tone-map pass was recorded and submitted.
    pub applied: bool,
    /// A luminance reduction was dispatched this frame.
    pub dispatched: bool,
    /// A reduction was due but every readback slot was still in flight.
    pub dispatch_skipped: bool,
    /// Exposure handed to the tone-map pass.
    pub exposure: f32,
    /// Target exposure after this frame's readbacks were folded in.
    pub target_exposure: f32,
    /// Readbacks folded into the target this frame.
    pub readbacks_consumed: u32,
    /// Readbacks dropped: stale, failed, empty or arriving while inactive.
    pub readbacks_discarded: u32,
}

/// Reasons the feature cannot run on a device. Any of these disables it for
/// the rest of its lifetime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapabilityError {
    #[error("adapter does not support compute shaders")]
    ComputeUnsupported,
    #[error("tone-map shader '{label}' failed to compile: {message}")]
    ShaderInvalid { label: String, message: String },
    #[error("failed to create {stage} pipeline: {message}")]
    Pipeline { stage: &'static str, message: String },
}
