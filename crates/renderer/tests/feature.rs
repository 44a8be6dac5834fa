use std::time::{Duration, Instant};

use exposureconfig::ExposureConfig;
use image::{DynamicImage, Rgba, Rgba32FImage};
use renderer::{
    create_frame_texture, read_frame_rgba8, upload_image, AutoExposureFeature, CapabilityError,
    FrameTarget, GpuContext, GpuMemoryMode, GpuPowerPreference, ReinhardToneMap, WgslToneMap,
};

const FRAME_STEP: Duration = Duration::from_millis(16);

fn context() -> Option<GpuContext> {
    match GpuContext::new(GpuPowerPreference::Low, GpuMemoryMode::Balanced) {
        Ok(context) if context.downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) => {
            Some(context)
        }
        Ok(_) => {
            eprintln!("skipping: adapter lacks compute shaders");
            None
        }
        Err(err) => {
            eprintln!("skipping: no GPU adapter ({err:#})");
            None
        }
    }
}

fn gray(width: u32, height: u32, value: f32) -> DynamicImage {
    DynamicImage::ImageRgba32F(Rgba32FImage::from_pixel(
        width,
        height,
        Rgba([value, value, value, 1.0]),
    ))
}

fn halve_shader() -> WgslToneMap {
    WgslToneMap::new(
        "halve",
        "fn tone_map(color: vec4<f32>, exposure: f32, range: vec2<f32>, white_point: f32) -> vec4<f32> {\n    return vec4<f32>(color.rgb * 0.5, color.a);\n}\n",
    )
}

fn wait(context: &GpuContext) {
    let _ = context.device.poll(wgpu::PollType::Wait);
}

#[test]
fn missing_compute_disables_feature() {
    let Some(context) = context() else { return };
    let downlevel = wgpu::DownlevelCapabilities {
        flags: wgpu::DownlevelFlags::empty(),
        ..wgpu::DownlevelCapabilities::default()
    };
    let mut feature = AutoExposureFeature::initialise(
        &context.device,
        &context.queue,
        &downlevel,
        &ReinhardToneMap,
        Instant::now(),
    );
    assert!(!feature.is_active());
    assert_eq!(
        feature.disabled_reason(),
        Some(&CapabilityError::ComputeUnsupported)
    );
    assert_eq!(feature.exposure(), None);

    let frame = create_frame_texture(&context.device, 16, 16);
    let report = feature.run_frame(
        FrameTarget::new(&frame),
        Some(&ExposureConfig::default()),
        Instant::now(),
    );
    assert!(!report.applied);
    assert!(!report.dispatched);
}

#[test]
fn invalid_shader_disables_feature() {
    let Some(context) = context() else { return };
    let shader = WgslToneMap::new("broken", "fn tone_map() -> f32 { return 1.0; }\n");
    let feature = AutoExposureFeature::from_context(&context, &shader, Instant::now());
    assert!(matches!(
        feature.disabled_reason(),
        Some(CapabilityError::ShaderInvalid { .. })
    ));
}

#[test]
fn uniform_frame_converges_on_its_luminance() {
    let Some(context) = context() else { return };
    let start = Instant::now();
    let mut feature = AutoExposureFeature::from_context(&context, &ReinhardToneMap, start);
    assert!(feature.is_active());
    let reader = feature.reader().expect("active feature has a reader");

    let config = ExposureConfig {
        frames_per_compute: 1,
        ..ExposureConfig::default()
    };
    let image = gray(48, 70, 1.0);
    let frame = create_frame_texture(&context.device, 48, 70);
    let mut now = start;
    for _ in 0..6 {
        upload_image(&context.queue, &frame, &image).expect("upload");
        now += FRAME_STEP;
        let report = feature.run_frame(FrameTarget::new(&frame), Some(&config), now);
        assert!(report.applied);
        wait(&context);
    }

    assert!((reader.target() - 1.0).abs() < 1e-3, "target {}", reader.target());
    let current = reader.current();
    assert!(current > 0.0 && current <= 1.0 + 1e-3, "current {current}");
}

#[test]
fn target_follows_frame_size_changes() {
    let Some(context) = context() else { return };
    let start = Instant::now();
    let mut feature = AutoExposureFeature::from_context(&context, &ReinhardToneMap, start);
    let reader = feature.reader().expect("active feature has a reader");
    let config = ExposureConfig {
        frames_per_compute: 1,
        ..ExposureConfig::default()
    };

    context.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let mut now = start;
    // Grows, then shrinks, the row count between runs.
    for (width, height, value) in [(32, 32, 0.25f32), (48, 70, 1.0), (48, 40, 0.5)] {
        let image = gray(width, height, value);
        let frame = create_frame_texture(&context.device, width, height);
        for _ in 0..4 {
            upload_image(&context.queue, &frame, &image).expect("upload");
            now += FRAME_STEP;
            let report = feature.run_frame(FrameTarget::new(&frame), Some(&config), now);
            assert!(report.applied, "{width}x{height}");
            wait(&context);
        }
        let expected = config
            .global_exposure_range
            .clamp(metering::perceptual_remap(value));
        assert!(
            (reader.target() - expected).abs() < 1e-3,
            "{width}x{height}: target {} expected {expected}",
            reader.target()
        );
    }
    let error = pollster::block_on(context.device.pop_error_scope());
    assert!(error.is_none(), "{error:?}");
    assert!(feature.is_active());
}

#[test]
fn reductions_follow_frames_per_compute() {
    let Some(context) = context() else { return };
    let start = Instant::now();
    let mut feature = AutoExposureFeature::from_context(&context, &ReinhardToneMap, start);
    let config = ExposureConfig {
        frames_per_compute: 3,
        ..ExposureConfig::default()
    };
    let frame = create_frame_texture(&context.device, 32, 32);
    let image = gray(32, 32, 0.5);

    let mut now = start;
    let mut dispatched = 0;
    let mut applied = 0;
    for _ in 0..9 {
        upload_image(&context.queue, &frame, &image).expect("upload");
        now += FRAME_STEP;
        let report = feature.run_frame(FrameTarget::new(&frame), Some(&config), now);
        dispatched += u32::from(report.dispatched);
        applied += u32::from(report.applied);
        wait(&context);
    }
    assert_eq!(dispatched, 3);
    assert_eq!(applied, 9);
    let stats = feature.stats().expect("active");
    assert_eq!(stats.frames, 9);
    assert_eq!(stats.dispatches_planned, 3);
}

#[test]
fn tone_map_is_written_back_to_frame() {
    let Some(context) = context() else { return };
    let mut feature = AutoExposureFeature::from_context(&context, &halve_shader(), Instant::now());
    let frame = create_frame_texture(&context.device, 8, 8);
    upload_image(&context.queue, &frame, &gray(8, 8, 0.5)).expect("upload");

    let report = feature.run_frame(
        FrameTarget::new(&frame),
        Some(&ExposureConfig::default()),
        Instant::now(),
    );
    assert!(report.applied);

    // 0.25 linear encodes to ~137 in sRGB.
    let pixels = read_frame_rgba8(&context.device, &context.queue, &frame).expect("readback");
    let pixel = pixels.get_pixel(3, 5);
    assert!((i32::from(pixel[0]) - 137).abs() <= 1, "{pixel:?}");
    assert_eq!(pixel[3], 255);
}

#[test]
fn inactive_config_leaves_frame_untouched() {
    let Some(context) = context() else { return };
    let mut feature = AutoExposureFeature::from_context(&context, &halve_shader(), Instant::now());
    let frame = create_frame_texture(&context.device, 8, 8);
    upload_image(&context.queue, &frame, &gray(8, 8, 0.5)).expect("upload");
    let before = read_frame_rgba8(&context.device, &context.queue, &frame).expect("readback");

    let config = ExposureConfig {
        active: false,
        ..ExposureConfig::default()
    };
    let report = feature.run_frame(FrameTarget::new(&frame), Some(&config), Instant::now());
    assert!(!report.applied);
    let report = feature.run_frame(FrameTarget::new(&frame), None, Instant::now());
    assert!(!report.applied);

    let after = read_frame_rgba8(&context.device, &context.queue, &frame).expect("readback");
    assert_eq!(before, after);
    assert_eq!(feature.stats().map(|stats| stats.frames), Some(0));
}

#[test]
fn frames_without_render_usage_are_skipped() {
    let Some(context) = context() else { return };
    let mut feature = AutoExposureFeature::from_context(&context, &ReinhardToneMap, Instant::now());
    let texture = context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("sample-only frame"),
        size: wgpu::Extent3d {
            width: 8,
            height: 8,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba16Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let report = feature.run_frame(
        FrameTarget::new(&texture),
        Some(&ExposureConfig::default()),
        Instant::now(),
    );
    assert!(!report.applied);
    assert!(feature.is_active());
}

#[test]
fn dispose_detaches_and_is_idempotent() {
    let Some(context) = context() else { return };
    let mut feature = AutoExposureFeature::from_context(&context, &ReinhardToneMap, Instant::now());
    let reader = feature.reader().expect("active");
    let frame = create_frame_texture(&context.device, 16, 16);
    upload_image(&context.queue, &frame, &gray(16, 16, 2.0)).expect("upload");
    let report = feature.run_frame(
        FrameTarget::new(&frame),
        Some(&ExposureConfig::default()),
        Instant::now(),
    );
    assert!(report.dispatched);

    feature.dispose();
    feature.dispose();
    wait(&context);
    assert!(!feature.is_active());
    assert!(reader.is_detached());
    assert_eq!(reader.target(), 0.0);

    let report = feature.run_frame(
        FrameTarget::new(&frame),
        Some(&ExposureConfig::default()),
        Instant::now(),
    );
    assert_eq!(report, renderer::FrameReport::default());
}
