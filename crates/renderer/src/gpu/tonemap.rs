use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::compile::{compile_blit_shader, compile_tone_map_shader, ToneMapShader};
use crate::types::CapabilityError;

use super::uniforms::ToneMapUniforms;

struct FormatPipelines {
    tone_map: wgpu::RenderPipeline,
    blit: wgpu::RenderPipeline,
}

struct ScratchTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

/// Two-stage exposure blit: frame → scratch through the host's `tone_map`,
/// then scratch → frame unchanged.
pub(crate) struct ToneMapApplier {
    label: String,
    tone_map_module: wgpu::ShaderModule,
    blit_module: wgpu::ShaderModule,
    tone_map_layout: wgpu::BindGroupLayout,
    blit_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    pipelines: HashMap<wgpu::TextureFormat, FormatPipelines>,
    scratch: Option<ScratchTarget>,
}

impl ToneMapApplier {
    pub fn new(device: &wgpu::Device, shader: &dyn ToneMapShader) -> Result<Self, CapabilityError> {
        let tone_map_module = compile_tone_map_shader(device, shader)?;
        let blit_module = compile_blit_shader(device);

        let tone_map_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tone map layout"),
            entries: &[
                source_texture_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("exposure blit layout"),
            entries: &[source_texture_entry(0)],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tone map uniforms"),
            size: std::mem::size_of::<ToneMapUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            label: shader.label().to_owned(),
            tone_map_module,
            blit_module,
            tone_map_layout,
            blit_layout,
            uniform_buffer,
            pipelines: HashMap::new(),
            scratch: None,
        })
    }

    /// Builds (once) the pipelines for a target format.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
    ) -> Result<(), CapabilityError> {
        if self.pipelines.contains_key(&format) {
            return Ok(());
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let tone_map = build_pipeline(
            device,
            &self.label,
            &self.tone_map_layout,
            &self.tone_map_module,
            format,
        );
        let blit = build_pipeline(
            device,
            "exposure blit",
            &self.blit_layout,
            &self.blit_module,
            format,
        );
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(CapabilityError::Pipeline {
                stage: "tone map",
                message: err.to_string(),
            });
        }

        tracing::debug!(?format, shader = %self.label, "built tone map pipelines");
        self.pipelines
            .insert(format, FormatPipelines { tone_map, blit });
        Ok(())
    }

    /// Reallocates the scratch texture only when size or format changed.
    fn ensure_scratch(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) {
        if let Some(scratch) = &self.scratch {
            if scratch.width == width && scratch.height == height && scratch.format == format {
                return;
            }
        }
        if let Some(previous) = self.scratch.take() {
            previous.texture.destroy();
        }
        tracing::debug!(width, height, ?format, "allocating exposure scratch target");
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("exposure scratch"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.scratch = Some(ScratchTarget {
            texture,
            view,
            width,
            height,
            format,
        });
    }

    /// Records both stages into `encoder`.
    pub fn encode(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        frame: &wgpu::Texture,
        frame_view: &wgpu::TextureView,
        uniforms: &ToneMapUniforms,
    ) -> Result<(), CapabilityError> {
        let format = frame.format();
        self.prepare(device, format)?;
        self.ensure_scratch(device, frame.width(), frame.height(), format);
        let (Some(pipelines), Some(scratch)) = (self.pipelines.get(&format), self.scratch.as_ref())
        else {
            return Ok(());
        };

        // Staged through the encoder so the write is ordered with this frame's passes.
        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tone map uniform staging"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        encoder.copy_buffer_to_buffer(
            &staging,
            0,
            &self.uniform_buffer,
            0,
            std::mem::size_of::<ToneMapUniforms>() as u64,
        );

        let tone_map_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tone map bind group"),
            layout: &self.tone_map_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(frame_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });
        let blit_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("exposure blit bind group"),
            layout: &self.blit_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&scratch.view),
            }],
        });

        draw_fullscreen(
            encoder,
            "tone map pass",
            &scratch.view,
            &pipelines.tone_map,
            &tone_map_bind_group,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        );
        draw_fullscreen(
            encoder,
            "exposure blit pass",
            frame_view,
            &pipelines.blit,
            &blit_bind_group,
            wgpu::LoadOp::Load,
        );
        Ok(())
    }

    pub fn destroy(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            scratch.texture.destroy();
        }
        self.pipelines.clear();
        self.uniform_buffer.destroy();
    }
}

fn source_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    label: &str,
    bind_group_layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("autoexpose_vs"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("autoexpose_fs"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

fn draw_fullscreen(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    target: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
    load: wgpu::LoadOp<wgpu::Color>,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..3, 0..1);
}
