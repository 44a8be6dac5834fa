use crate::compile::compile_reduce_shader;

use super::uniforms::ReduceUniforms;

/// Rows summed by one reduction workgroup.
pub(crate) const GROUP_SIZE: u32 = 32;

const SCALARS_PER_GROUP: u64 = 2;
const SCALAR_BYTES: u64 = std::mem::size_of::<f32>() as u64;

pub(crate) fn group_count(height: u32) -> u32 {
    height.div_ceil(GROUP_SIZE)
}

/// Size in bytes of the interleaved `(sum, count)` output for a frame height.
pub(crate) fn output_size(height: u32) -> wgpu::BufferAddress {
    u64::from(group_count(height)) * SCALARS_PER_GROUP * SCALAR_BYTES
}

struct ReductionOutput {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
}

/// Compute pass estimating the frame's luminance as per-group partial sums.
pub(crate) struct LuminanceReducer {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    output: Option<ReductionOutput>,
}

impl LuminanceReducer {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("luminance reduce layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("luminance reduce pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let module = compile_reduce_shader(device);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("luminance reduce pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("reduce_rows"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("luminance reduce params"),
            size: std::mem::size_of::<ReduceUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            layout,
            params,
            output: None,
        }
    }

    /// (Re)allocates the output buffer when the frame size changed. Calling it
    /// again with the same size does nothing.
    pub fn ensure_output(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32) {
        if let Some(output) = &self.output {
            if output.width == width && output.height == height {
                return;
            }
        }
        if let Some(previous) = self.output.take() {
            previous.buffer.destroy();
        }

        let size = output_size(height);
        tracing::debug!(width, height, groups = group_count(height), size, "allocating luminance output");
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("luminance partials"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        queue.write_buffer(
            &self.params,
            0,
            bytemuck::bytes_of(&ReduceUniforms::new(width, height)),
        );
        self.output = Some(ReductionOutput {
            buffer,
            width,
            height,
        });
    }

    /// Records the reduction over `frame` and copies its output into
    /// `destination`. Returns the number of bytes copied.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame: &wgpu::TextureView,
        width: u32,
        height: u32,
        destination: &wgpu::Buffer,
    ) -> wgpu::BufferAddress {
        self.ensure_output(device, queue, width, height);
        let Some(output) = &self.output else {
            return 0;
        };

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("luminance reduce bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(frame),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.buffer.as_entire_binding(),
                },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("luminance reduce pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(group_count(height), 1, 1);
        }

        let size = output_size(height);
        encoder.copy_buffer_to_buffer(&output.buffer, 0, destination, 0, size);
        size
    }

    pub fn destroy(&mut self) {
        if let Some(output) = self.output.take() {
            output.buffer.destroy();
        }
        self.params.destroy();
    }
}
