use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::calibration::DEFAULT_CALIBRATION_SAMPLES;
use crate::error::{ensure_positive, ImuError, Result};
use crate::fall_detector::FallDetectorConfig;
use crate::filters::complementary::DEFAULT_ALPHA;

/// Settings for the whole sample loop. Every field has a default, so a JSON
/// file only needs the values it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate_hz: f32,
    pub lpf_cutoff_hz: f32,
    /// Median window applied to accel ahead of the low-pass (0 = off)
    pub accel_median_window: usize,
    pub moving_average_window: usize,
    pub complementary_alpha: f32,
    pub gyro_calibration_samples: usize,
    /// Feed the fall detector low-pass filtered accel instead of raw
    pub detect_on_filtered_accel: bool,
    pub fall: FallDetectorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100.0,
            lpf_cutoff_hz: 5.0,
            accel_median_window: 0,
            moving_average_window: 8,
            complementary_alpha: DEFAULT_ALPHA,
            gyro_calibration_samples: DEFAULT_CALIBRATION_SAMPLES,
            detect_on_filtered_accel: false,
            fall: FallDetectorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("sample_rate_hz", self.sample_rate_hz)?;
        ensure_positive("lpf_cutoff_hz", self.lpf_cutoff_hz)?;
        if self.lpf_cutoff_hz >= self.sample_rate_hz / 2.0 {
            return Err(ImuError::Config(format!(
                "lpf_cutoff_hz ({}) must be below Nyquist ({})",
                self.lpf_cutoff_hz,
                self.sample_rate_hz / 2.0
            )));
        }
        if self.moving_average_window == 0 {
            return Err(ImuError::Config(
                "moving_average_window must be >= 1".to_string(),
            ));
        }
        if !(self.complementary_alpha > 0.0 && self.complementary_alpha < 1.0) {
            return Err(ImuError::Config(format!(
                "complementary_alpha must be in (0, 1) (got {})",
                self.complementary_alpha
            )));
        }
        if self.gyro_calibration_samples == 0 {
            return Err(ImuError::Config(
                "gyro_calibration_samples must be >= 1".to_string(),
            ));
        }
        self.fall.validate()
    }

    /// Nominal sample period in seconds
    pub fn sample_period_s(&self) -> f32 {
        1.0 / self.sample_rate_hz
    }
}
