use std::path::{Path, PathBuf};

use clap::Parser;
use renderer::GpuPowerPreference;

#[derive(Parser, Debug)]
#[command(
    name = "autoexpose",
    author,
    version,
    about = "Meter and tone map an image sequence with GPU auto exposure"
)]
pub struct Cli {
    /// Frames to feed through the pipeline, in order. Each image holds for an
    /// equal share of `--frames`.
    #[arg(value_name = "IMAGE", required_unless_present = "print_config")]
    pub images: Vec<PathBuf>,

    /// Exposure configuration (TOML). Defaults to `exposure.toml` in the
    /// config directory when present.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Total frames to simulate.
    #[arg(long, value_name = "COUNT", default_value_t = 120, value_parser = clap::value_parser!(u32).range(1..))]
    pub frames: u32,

    /// Simulated frame rate; sets the timestep handed to the controller.
    #[arg(long, value_name = "FPS", default_value_t = 60.0, value_parser = parse_fps)]
    pub fps: f32,

    /// Override `frames_per_compute` from the configuration.
    #[arg(long, value_name = "K")]
    pub frames_per_compute: Option<u32>,

    /// Write the last tone-mapped frame to this PNG path.
    #[arg(long, value_name = "PATH", value_parser = parse_png_path)]
    pub output: Option<PathBuf>,

    /// Write a JSON report of the exposure trajectory.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// WGSL file defining `tone_map`; the built-in Reinhard operator is used otherwise.
    #[arg(long, value_name = "FILE")]
    pub shader: Option<PathBuf>,

    /// Adapter preference: `low` or `high`.
    #[arg(
        long,
        value_name = "POWER",
        default_value_t = GpuPowerPreference::default(),
        env = "AUTOEXPOSE_GPU_POWER"
    )]
    pub gpu_power: GpuPowerPreference,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub print_config: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate '{value}'"))?;
    if !fps.is_finite() || fps <= 0.0 {
        return Err("frame rate must be a positive number".to_string());
    }
    Ok(fps)
}

pub fn parse_png_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    match extension(&path).as_deref() {
        Some("png") => Ok(path),
        None => Err("output path has no extension; expected .png".to_string()),
        Some(other) => Err(format!("unsupported output format '.{other}'; expected .png")),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
