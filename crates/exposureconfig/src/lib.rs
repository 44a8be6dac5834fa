use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Hard limits on the raw exposure bounds, matching the volume sliders the
/// parameters were tuned with.
pub const GLOBAL_RANGE_LIMITS: (f32, f32) = (0.0, 30.0);
/// Hard limits on the perceptual range handed to the tone-mapping shader.
pub const EXPOSURE_RANGE_LIMITS: (f32, f32) = (-6.0, 6.0);
/// Upper bound on the reduction throttle.
pub const MAX_FRAMES_PER_COMPUTE: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How `currentExposure` chases `targetExposure` between readbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMode {
    /// Frame-rate independent exponential decay.
    #[default]
    Exponential,
    /// Constant-rate approach, capped per second by the increase/decrease speeds.
    Linear,
}

/// Closed `[min, max]` interval.
///
/// Accepts either `[min, max]` or `{ min = .., max = .. }` in TOML and always
/// serialises back to the array form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRange {
    pub min: f32,
    pub max: f32,
}

impl ExposureRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Clamps `value` into the range. NaN collapses to `min`.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.min;
        }
        value.max(self.min).min(self.max)
    }

    /// Inclusive on both ends.
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    /// `[min, max]`, the layout the shader expects.
    pub fn as_array(&self) -> [f32; 2] {
        [self.min, self.max]
    }

    fn validate(&self, name: &str, limits: (f32, f32)) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "{name} bounds must be finite"
            )));
        }
        if self.min > self.max {
            return Err(ConfigError::Invalid(format!(
                "{name} min ({}) must not exceed max ({})",
                self.min, self.max
            )));
        }
        if self.min < limits.0 || self.max > limits.1 {
            return Err(ConfigError::Invalid(format!(
                "{name} [{}, {}] must lie within [{}, {}]",
                self.min, self.max, limits.0, limits.1
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ExposureRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

impl Serialize for ExposureRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.as_array())
    }
}

impl<'de> Deserialize<'de> for ExposureRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Pair([f32; 2]),
            Table { min: f32, max: f32 },
        }

        match Helper::deserialize(deserializer) {
            Ok(Helper::Pair([min, max])) | Ok(Helper::Table { min, max }) => {
                Ok(ExposureRange { min, max })
            }
            Err(_) => Err(de::Error::custom(
                "expected a range as `[min, max]` or `{ min = .., max = .. }`",
            )),
        }
    }
}

/// Tunable parameters for the auto-exposure feature.
///
/// The host hands a snapshot of this to the feature every frame; `None` or
/// `active = false` turns every per-frame entry point into a no-op.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExposureConfig {
    #[serde(default = "default_active")]
    pub active: bool,
    /// Run the luminance reduction once every this many frames.
    #[serde(default = "default_frames_per_compute")]
    pub frames_per_compute: u32,
    /// Bounds applied to the raw exposure before it becomes the target.
    #[serde(default = "default_global_exposure_range")]
    pub global_exposure_range: ExposureRange,
    /// Perceptual range forwarded to the tone-mapping shader.
    #[serde(default = "default_exposure_range")]
    pub exposure_range: ExposureRange,
    #[serde(default = "default_increase_speed")]
    pub increase_speed: f32,
    #[serde(default = "default_decrease_speed")]
    pub decrease_speed: f32,
    #[serde(default = "default_white_point")]
    pub white_point: f32,
    #[serde(default)]
    pub smoothing: SmoothingMode,
}

fn default_active() -> bool {
    true
}

fn default_frames_per_compute() -> u32 {
    3
}

fn default_global_exposure_range() -> ExposureRange {
    ExposureRange::new(0.0, 20.0)
}

fn default_exposure_range() -> ExposureRange {
    ExposureRange::new(-2.5, 0.6)
}

fn default_increase_speed() -> f32 {
    10.0
}

fn default_decrease_speed() -> f32 {
    5.0
}

fn default_white_point() -> f32 {
    3.0
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            active: default_active(),
            frames_per_compute: default_frames_per_compute(),
            global_exposure_range: default_global_exposure_range(),
            exposure_range: default_exposure_range(),
            increase_speed: default_increase_speed(),
            decrease_speed: default_decrease_speed(),
            white_point: default_white_point(),
            smoothing: SmoothingMode::default(),
        }
    }
}

impl ExposureConfig {
    /// Parses a TOML document, filling missing fields with defaults, and
    /// validates the result.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ExposureConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Serialises every field, defaults included.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Throttle interval with the zero case folded to "every frame".
    pub fn compute_interval(&self) -> u32 {
        self.frames_per_compute.max(1)
    }

    /// Checks the throttle, both ranges against their hard limits, and that
    /// speeds and white point are finite and positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_per_compute == 0 || self.frames_per_compute > MAX_FRAMES_PER_COMPUTE {
            return Err(ConfigError::Invalid(format!(
                "frames_per_compute must be between 1 and {MAX_FRAMES_PER_COMPUTE}, got {}",
                self.frames_per_compute
            )));
        }

        self.global_exposure_range
            .validate("global_exposure_range", GLOBAL_RANGE_LIMITS)?;
        self.exposure_range
            .validate("exposure_range", EXPOSURE_RANGE_LIMITS)?;

        for (name, value) in [
            ("increase_speed", self.increase_speed),
            ("decrease_speed", self.decrease_speed),
            ("white_point", self.white_point),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a finite value > 0, got {value}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
active = true
frames_per_compute = 5
global_exposure_range = [0.0, 12.0]
exposure_range = { min = -3.0, max = 1.0 }
increase_speed = 4
decrease_speed = 8.5
white_point = 2.5
smoothing = "linear"
"#;

    #[test]
    fn parses_sample_config() {
        let config = ExposureConfig::from_toml_str(SAMPLE).expect("parse config");
        assert!(config.active);
        assert_eq!(config.frames_per_compute, 5);
        assert_eq!(config.global_exposure_range, ExposureRange::new(0.0, 12.0));
        assert_eq!(config.exposure_range, ExposureRange::new(-3.0, 1.0));
        assert_eq!(config.increase_speed, 4.0);
        assert_eq!(config.decrease_speed, 8.5);
        assert_eq!(config.white_point, 2.5);
        assert_eq!(config.smoothing, SmoothingMode::Linear);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = ExposureConfig::from_toml_str("").expect("defaults");
        assert_eq!(config, ExposureConfig::default());
        assert_eq!(config.frames_per_compute, 3);
        assert_eq!(config.global_exposure_range, ExposureRange::new(0.0, 20.0));
        assert_eq!(config.exposure_range, ExposureRange::new(-2.5, 0.6));
        assert_eq!(config.smoothing, SmoothingMode::Exponential);
    }

    #[test]
    fn rejects_zero_frames_per_compute() {
        let err = ExposureConfig::from_toml_str("frames_per_compute = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_range() {
        let err =
            ExposureConfig::from_toml_str("global_exposure_range = [10.0, 2.0]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_range_outside_limits() {
        let err = ExposureConfig::from_toml_str("exposure_range = [-8.0, 0.0]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_positive_speed() {
        let err = ExposureConfig::from_toml_str("decrease_speed = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = ExposureConfig::from_toml_str("white_point = -1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_range() {
        let err = ExposureConfig::from_toml_str("exposure_range = \"wide\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serialised_config_parses_back() {
        let config = ExposureConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().expect("serialise");
        assert!(text.contains("global_exposure_range = [0.0, 12.0]"));
        let reparsed = ExposureConfig::from_toml_str(&text).expect("reparse");
        assert_eq!(reparsed, config);
    }

    #[test]
    fn range_clamp_handles_nan_and_bounds() {
        let range = ExposureRange::new(0.0, 20.0);
        assert_eq!(range.clamp(f32::NAN), 0.0);
        assert_eq!(range.clamp(-3.0), 0.0);
        assert_eq!(range.clamp(42.0), 20.0);
        assert_eq!(range.clamp(f32::INFINITY), 20.0);
        assert_eq!(range.clamp(7.5), 7.5);
    }
}
