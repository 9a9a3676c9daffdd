use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fall_detector::FallDetector;

/// A confirmed fall, as handed to whatever raises the alert
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub timestamp_ms: u32,
    pub recorded_at: String,   // wall clock, RFC 3339
    pub incident_type: String, // "fall"
    pub peak_magnitude_g: f32,
    pub variance: Option<f32>,
    pub pitch_deg: f32,
    pub roll_deg: f32,
}

impl Incident {
    /// Snapshot the detector on the tick it entered `Detected`
    pub fn fall(detector: &FallDetector, timestamp_ms: u32, pitch_deg: f32, roll_deg: f32) -> Self {
        Self {
            timestamp_ms,
            recorded_at: Utc::now().to_rfc3339(),
            incident_type: "fall".to_string(),
            peak_magnitude_g: detector.peak_magnitude(),
            variance: detector.last_variance(),
            pitch_deg,
            roll_deg,
        }
    }

    /// Write as `incident_<timestamp_ms>.json` under `dir`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("incident_{}.json", self.timestamp_ms));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}
