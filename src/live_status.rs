use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::fall_detector::FallPhase;
use crate::pipeline::ImuPipeline;
use crate::types::Vector3;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub samples_processed: u64,
    pub samples_dropped: u64,
    // Calibration
    pub calibration_complete: bool,
    pub gyro_bias: Vector3,
    // Orientation
    pub pitch_deg: f32,
    pub roll_deg: f32,
    // Fall detection
    pub phase: FallPhase,
    pub last_magnitude_g: f32,
    pub last_variance: Option<f32>,
    pub impacts_detected: u32,
    pub falls_detected: u32,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            samples_processed: 0,
            samples_dropped: 0,
            calibration_complete: false,
            gyro_bias: Vector3::zero(),
            pitch_deg: 0.0,
            roll_deg: 0.0,
            phase: FallPhase::Normal,
            last_magnitude_g: 0.0,
            last_variance: None,
            impacts_detected: 0,
            falls_detected: 0,
        }
    }

    pub fn from_pipeline(pipeline: &ImuPipeline, uptime_seconds: u64) -> Self {
        let stats = pipeline.stats();
        let detector = pipeline.detector();
        Self {
            timestamp: current_timestamp(),
            uptime_seconds,
            samples_processed: stats.samples_processed,
            samples_dropped: 0,
            calibration_complete: pipeline.calibrator().is_complete(),
            gyro_bias: pipeline.calibrator().bias(),
            pitch_deg: pipeline.complementary().pitch(),
            roll_deg: pipeline.complementary().roll(),
            phase: detector.state(),
            last_magnitude_g: detector.last_magnitude(),
            last_variance: detector.last_variance(),
            impacts_detected: stats.impacts,
            falls_detected: stats.falls,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::types::ImuSample;

    #[test]
    fn test_from_pipeline() {
        let mut pipeline = ImuPipeline::new(PipelineConfig::default()).unwrap();
        for i in 0..5 {
            pipeline.process(&ImuSample::new(Vector3::new(0.0, 0.0, 1.0), Vector3::zero(), i * 10));
        }
        let status = LiveStatus::from_pipeline(&pipeline, 3);
        assert_eq!(status.samples_processed, 5);
        assert_eq!(status.phase, FallPhase::Normal);
        assert!(!status.calibration_complete);
        assert!((status.last_magnitude_g - 1.0).abs() < 1e-6);

        let path = std::env::temp_dir().join(format!("imu_fall_status_{}.json", std::process::id()));
        status.save(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["phase"], "normal");
        assert_eq!(json["uptime_seconds"], 3);
        let _ = fs::remove_file(&path);
    }
}
