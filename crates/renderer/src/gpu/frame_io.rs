use anyhow::{anyhow, ensure, Context, Result};
use half::f16;
use image::{DynamicImage, RgbaImage};

/// Format of frames created by [`create_frame_texture`]: linear HDR.
pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

const BYTES_PER_PIXEL: u32 = 8;

/// Allocates a frame the feature can meter and tone map in place, and that can
/// be uploaded to and read back from.
pub fn create_frame_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("autoexpose frame"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FRAME_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// Writes `image` into `texture`, linearising 8/16-bit sources from sRGB.
/// Float sources (e.g. Radiance HDR) are taken as already linear.
pub fn upload_image(queue: &wgpu::Queue, texture: &wgpu::Texture, image: &DynamicImage) -> Result<()> {
    let (width, height) = (image.width(), image.height());
    ensure!(
        texture.width() == width && texture.height() == height,
        "frame texture is {}x{}, image is {width}x{height}",
        texture.width(),
        texture.height()
    );
    ensure!(
        texture.format() == FRAME_FORMAT,
        "frame texture must be {FRAME_FORMAT:?}, got {:?}",
        texture.format()
    );

    let is_linear = matches!(
        image,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)
    );
    let texels: Vec<f16> = image
        .to_rgba32f()
        .pixels()
        .flat_map(|pixel| {
            let [r, g, b, a] = pixel.0;
            let decode = |value: f32| {
                if is_linear {
                    value
                } else {
                    srgb_to_linear(value)
                }
            };
            [decode(r), decode(g), decode(b), a].map(f16::from_f32)
        })
        .collect();

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&texels),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * BYTES_PER_PIXEL),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    Ok(())
}

/// Copies a frame back to the CPU and encodes it as 8-bit sRGB. Blocks until
/// the GPU is done; meant for exports, not the frame loop.
pub fn read_frame_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<RgbaImage> {
    ensure!(
        texture.format() == FRAME_FORMAT,
        "readback only supports {FRAME_FORMAT:?}, got {:?}",
        texture.format()
    );
    let (width, height) = (texture.width(), texture.height());
    let tight_bpr = (width * BYTES_PER_PIXEL) as usize;
    let padded_bpr = align_bytes_per_row(tight_bpr);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("frame export staging"),
        size: (padded_bpr * height as usize) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("frame export encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr as u32),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .context("failed to wait for frame export")?;
    receiver
        .recv()
        .map_err(|_| anyhow!("frame export map callback was dropped"))?
        .context("failed to map frame export buffer")?;

    let mut tight = vec![0u8; tight_bpr * height as usize];
    {
        let data = slice.get_mapped_range();
        for row in 0..height as usize {
            let src = row * padded_bpr;
            let dst = row * tight_bpr;
            tight[dst..dst + tight_bpr].copy_from_slice(&data[src..src + tight_bpr]);
        }
    }
    staging.unmap();
    staging.destroy();

    let bytes: Vec<u8> = tight
        .chunks_exact(BYTES_PER_PIXEL as usize)
        .flat_map(|pixel| {
            let channel = |index: usize| {
                f16::from_le_bytes([pixel[index * 2], pixel[index * 2 + 1]]).to_f32()
            };
            let [r, g, b, a] = [channel(0), channel(1), channel(2), channel(3)];
            [
                quantise(linear_to_srgb(r)),
                quantise(linear_to_srgb(g)),
                quantise(linear_to_srgb(b)),
                quantise(a),
            ]
        })
        .collect();
    RgbaImage::from_raw(width, height, bytes)
        .ok_or_else(|| anyhow!("frame export produced a short buffer"))
}

fn align_bytes_per_row(value: usize) -> usize {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
    value.div_ceil(align) * align
}

fn quantise(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub(crate) fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.040_45 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

pub(crate) fn linear_to_srgb(value: f32) -> f32 {
    let value = value.max(0.0);
    if value <= 0.003_130_8 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}
