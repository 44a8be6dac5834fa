use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use exposureconfig::ExposureConfig;
use renderer::{AdapterProfile, FrameReport};
use serde::Serialize;

/// JSON summary of one run, written with `--report`.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub adapter: AdapterSummary,
    pub active: bool,
    pub disabled_reason: Option<String>,
    pub config: ExposureConfig,
    pub fps: f32,
    /// Reductions actually recorded and submitted.
    pub dispatches: u32,
    /// Reductions that were due while every readback slot was busy.
    pub skipped_dispatches: u32,
    /// Reductions the scheduler asked for: `dispatches + skipped_dispatches`.
    pub dispatches_planned: u64,
    pub final_exposure: Option<f32>,
    pub frames: Vec<FrameRecord>,
}

#[derive(Debug, Serialize)]
pub struct AdapterSummary {
    pub name: String,
    pub backend: String,
    pub device_type: String,
}

impl From<&AdapterProfile> for AdapterSummary {
    fn from(profile: &AdapterProfile) -> Self {
        Self {
            name: profile.name.clone(),
            backend: format!("{:?}", profile.backend),
            device_type: format!("{:?}", profile.device_type),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub index: u32,
    pub image: usize,
    pub seconds: f64,
    pub exposure: f32,
    pub target_exposure: f32,
    pub dispatched: bool,
    pub dispatch_skipped: bool,
    pub readbacks_consumed: u32,
    pub readbacks_discarded: u32,
}

impl FrameRecord {
    pub fn new(index: u32, image: usize, seconds: f64, report: &FrameReport) -> Self {
        Self {
            index,
            image,
            seconds,
            exposure: report.exposure,
            target_exposure: report.target_exposure,
            dispatched: report.dispatched,
            dispatch_skipped: report.dispatch_skipped,
            readbacks_consumed: report.readbacks_consumed,
            readbacks_discarded: report.readbacks_discarded,
        }
    }
}

/// Tallies `(dispatched, skipped)` reductions over a run.
pub fn count_dispatches(frames: &[FrameRecord]) -> (u32, u32) {
    frames.iter().fold((0, 0), |(dispatched, skipped), frame| {
        (
            dispatched + u32::from(frame.dispatched),
            skipped + u32::from(frame.dispatch_skipped),
        )
    })
}

impl RunReport {
    /// Writes pretty-printed JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| {
                format!("failed to prepare directory for report at {}", dir.display())
            })?;
        }
        let serialized =
            serde_json::to_string_pretty(self).context("failed to serialise run report")?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }
}
