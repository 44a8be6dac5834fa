use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use exposureconfig::ExposureConfig;
use image::DynamicImage;
use renderer::{
    create_frame_texture, read_frame_rgba8, upload_image, AutoExposureFeature, FrameTarget,
    GpuContext, GpuMemoryMode, ReinhardToneMap, ToneMapShader, WgslToneMap,
};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::paths::AppPaths;
use crate::report::{count_dispatches, AdapterSummary, FrameRecord, RunReport};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout is reserved for `--print-config`.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration (`--config`, else the default file, else
/// built-in defaults) and applies command-line overrides.
pub fn resolve_config(cli: &Cli, paths: &AppPaths) -> Result<ExposureConfig> {
    tracing::debug!(config_dir = %paths.config_dir().display(), "resolved autoexpose paths");
    resolve_config_from(cli, &paths.config_file())
}

fn resolve_config_from(cli: &Cli, default_file: &Path) -> Result<ExposureConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None if default_file.is_file() => load_config_file(default_file)?,
        None => {
            tracing::debug!(path = %default_file.display(), "no config file; using defaults");
            ExposureConfig::default()
        }
    };

    if let Some(frames_per_compute) = cli.frames_per_compute {
        config.frames_per_compute = frames_per_compute;
    }
    config
        .validate()
        .context("invalid configuration after applying command-line overrides")?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<ExposureConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config = ExposureConfig::from_toml_str(&contents)
        .with_context(|| format!("failed to load config file at {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded exposure configuration");
    Ok(config)
}

/// Feeds the images through the feature for `--frames` simulated frames,
/// then writes the requested PNG and report.
pub fn run(cli: Cli, config: ExposureConfig) -> Result<()> {
    let images = load_images(&cli.images)?;
    let shader: Box<dyn ToneMapShader> = match &cli.shader {
        Some(path) => Box::new(load_shader(path)?),
        None => Box::new(ReinhardToneMap),
    };

    let context = GpuContext::new(cli.gpu_power, GpuMemoryMode::default())?;
    for image in &images {
        context.check_frame_size(image.width(), image.height())?;
    }
    tracing::info!(
        adapter = %context.adapter_profile.name,
        backend = ?context.adapter_profile.backend,
        frames = cli.frames,
        images = images.len(),
        fps = cli.fps,
        frames_per_compute = config.frames_per_compute,
        "starting auto exposure run"
    );

    // One texture per image; every frame re-uploads, as a host re-renders.
    let textures: Vec<_> = images
        .iter()
        .map(|image| create_frame_texture(&context.device, image.width(), image.height()))
        .collect();

    let start = Instant::now();
    let step = Duration::from_secs_f64(1.0 / f64::from(cli.fps));
    let mut feature = AutoExposureFeature::from_context(&context, shader.as_ref(), start);

    let log_every = (cli.fps.round() as u32).max(1);
    let mut records = Vec::with_capacity(cli.frames as usize);
    let mut last_image = 0;
    for index in 0..cli.frames {
        let image_index = image_for_frame(index, cli.frames, images.len());
        let texture = &textures[image_index];
        upload_image(&context.queue, texture, &images[image_index])
            .with_context(|| format!("failed to upload {}", cli.images[image_index].display()))?;

        let now = start + step * index;
        let report = feature.run_frame(FrameTarget::new(texture), Some(&config), now);

        if index % log_every == 0 {
            tracing::info!(
                frame = index,
                image = image_index,
                exposure = report.exposure,
                target = report.target_exposure,
                "exposure"
            );
        } else {
            tracing::debug!(
                frame = index,
                exposure = report.exposure,
                target = report.target_exposure,
                dispatched = report.dispatched,
                "exposure"
            );
        }
        records.push(FrameRecord::new(
            index,
            image_index,
            step.as_secs_f64() * f64::from(index),
            &report,
        ));
        last_image = image_index;
    }

    if let Some(path) = &cli.output {
        let pixels = read_frame_rgba8(&context.device, &context.queue, &textures[last_image])?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        }
        pixels
            .save(path)
            .with_context(|| format!("failed to write frame to {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote tone-mapped frame");
    }

    let (dispatches, skipped_dispatches) = count_dispatches(&records);
    let report = RunReport {
        adapter: AdapterSummary::from(&context.adapter_profile),
        active: feature.is_active(),
        disabled_reason: feature.disabled_reason().map(ToString::to_string),
        config,
        fps: cli.fps,
        dispatches,
        skipped_dispatches,
        dispatches_planned: feature.stats().map_or(0, |stats| stats.dispatches_planned),
        final_exposure: feature.exposure(),
        frames: records,
    };
    tracing::info!(
        active = report.active,
        dispatches = report.dispatches,
        skipped = report.skipped_dispatches,
        exposure = ?report.final_exposure,
        "auto exposure run finished"
    );
    if let Some(path) = &cli.report {
        report.write(path)?;
        tracing::info!(path = %path.display(), "wrote run report");
    }

    feature.dispose();
    Ok(())
}

fn load_images(paths: &[PathBuf]) -> Result<Vec<DynamicImage>> {
    if paths.is_empty() {
        bail!("no input images given");
    }
    paths
        .iter()
        .map(|path| -> Result<DynamicImage> {
            let image = image::open(path)
                .with_context(|| format!("failed to load image {}", path.display()))?;
            tracing::debug!(
                path = %path.display(),
                width = image.width(),
                height = image.height(),
                color = ?image.color(),
                "loaded frame"
            );
            Ok(image)
        })
        .collect()
}

fn load_shader(path: &Path) -> Result<WgslToneMap> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read tone-map shader at {}", path.display()))?;
    let label = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("tone map");
    Ok(WgslToneMap::new(label, source))
}

/// Splits `total` frames into equal consecutive runs, one per image.
fn image_for_frame(index: u32, total: u32, images: usize) -> usize {
    if images == 0 || total == 0 {
        return 0;
    }
    let slot = u64::from(index) * images as u64 / u64::from(total);
    (slot as usize).min(images - 1)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tempfile::TempDir;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["autoexpose", "--print-config"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn frames_are_split_evenly_across_images() {
        let picks: Vec<usize> = (0..6).map(|index| image_for_frame(index, 6, 3)).collect();
        assert_eq!(picks, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(image_for_frame(4, 5, 1), 0);
        assert_eq!(image_for_frame(2, 3, 10), 6);
    }

    #[test]
    fn missing_default_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = resolve_config_from(&cli(&[]), &dir.path().join("exposure.toml")).unwrap();
        assert_eq!(config, ExposureConfig::default());
    }

    #[test]
    fn default_file_is_loaded_and_overridden() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exposure.toml");
        fs::write(&path, "white_point = 5.0\nframes_per_compute = 4\n").unwrap();

        let config = resolve_config_from(&cli(&["--frames-per-compute", "2"]), &path).unwrap();
        assert_eq!(config.white_point, 5.0);
        assert_eq!(config.frames_per_compute, 2);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = resolve_config_from(
            &cli(&["--frames-per-compute", "0"]),
            &dir.path().join("exposure.toml"),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("frames_per_compute"));
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let missing = missing.to_str().unwrap();
        assert!(resolve_config_from(&cli(&["--config", missing]), Path::new("unused")).is_err());
    }
}
