use anyhow::{Context as AnyhowContext, Result};

use crate::types::{AdapterProfile, GpuMemoryMode, GpuPowerPreference};

/// Headless device for hosts that do not already own one (the CLI, tests).
pub struct GpuContext {
    _instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Summary of `adapter` for logs and reports.
    pub adapter_profile: AdapterProfile,
    /// Checked by the feature for compute support.
    pub downlevel: wgpu::DownlevelCapabilities,
}

impl GpuContext {
    /// Picks an adapter without a surface and opens a device with its full
    /// limits.
    pub fn new(gpu_power: GpuPowerPreference, gpu_memory: GpuMemoryMode) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: gpu_power.to_wgpu(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        let adapter_profile = AdapterProfile::from_wgpu(&adapter_info, &limits);
        let downlevel = adapter.get_downlevel_capabilities();
        tracing::debug!(
            name = %adapter_profile.name,
            backend = ?adapter_profile.backend,
            device_type = ?adapter_profile.device_type,
            is_software = adapter_profile.is_software(),
            compute = downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("autoexpose device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: gpu_memory.to_wgpu(),
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        Ok(Self {
            _instance: instance,
            adapter,
            device,
            queue,
            adapter_profile,
            downlevel,
        })
    }

    /// Checks a requested frame size against the adapter's texture limit.
    pub fn check_frame_size(&self, width: u32, height: u32) -> Result<()> {
        let max_dimension = self.adapter_profile.max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested frame is {width}x{height}"
            );
        }
        Ok(())
    }
}
