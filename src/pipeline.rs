use serde::{Deserialize, Serialize};

use crate::calibration::GyroCalibrator;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::fall_detector::{FallDetector, FallPhase};
use crate::filters::complementary::ComplementaryFilter;
use crate::incident::Incident;
use crate::smoothing::{LowPassFilter, MedianFilter, MovingAverageFilter};
use crate::types::{ImuSample, Vector3};

/// Everything derived from one sample
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub timestamp_ms: u32,
    pub filtered_accel: Vector3,
    pub smoothed_gyro: Vector3,
    pub pitch_deg: f32,
    pub roll_deg: f32,
    pub phase: FallPhase,
    pub fall_detected: bool,
    pub calibrated: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub samples_processed: u64,
    pub calibration_samples: u64,
    pub phase_changes: u64,
    pub impacts: u32,
    pub falls: u32,
}

/// Seconds between two millisecond stamps. Backwards stamps give 0.
fn elapsed_seconds(prev_ms: u32, now_ms: u32) -> f32 {
    let delta = now_ms.wrapping_sub(prev_ms);
    if delta > i32::MAX as u32 {
        0.0
    } else {
        delta as f32 / 1000.0
    }
}

/// Per-tick glue: gyro calibration, smoothing, tilt fusion and fall detection.
///
/// One instance per sensor; not shared across threads. Samples must arrive in
/// non-decreasing timestamp order.
pub struct ImuPipeline {
    config: PipelineConfig,
    calibrator: GyroCalibrator,
    accel_median: Option<MedianFilter>,
    accel_lpf: LowPassFilter,
    gyro_maf: MovingAverageFilter,
    complementary: ComplementaryFilter,
    detector: FallDetector,
    last_timestamp_ms: Option<u32>,
    stats: PipelineStats,
    incidents: Vec<Incident>,
}

impl ImuPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            calibrator: GyroCalibrator::with_samples(config.gyro_calibration_samples),
            accel_median: (config.accel_median_window > 0)
                .then(|| MedianFilter::new(config.accel_median_window)),
            accel_lpf: LowPassFilter::new(config.lpf_cutoff_hz, config.sample_rate_hz),
            gyro_maf: MovingAverageFilter::new(config.moving_average_window),
            complementary: ComplementaryFilter::new(config.complementary_alpha),
            detector: FallDetector::with_config(config.fall.clone()),
            last_timestamp_ms: None,
            stats: PipelineStats::default(),
            incidents: Vec::new(),
            config,
        })
    }

    pub fn process(&mut self, sample: &ImuSample) -> PipelineOutput {
        if !self.calibrator.is_complete() {
            self.calibrator.add_sample(sample.gyro);
            self.stats.calibration_samples += 1;
        }

        let gyro = self.calibrator.apply(sample.gyro);
        let despiked = match self.accel_median.as_mut() {
            Some(median) => median.update(sample.accel),
            None => sample.accel,
        };
        let filtered_accel = self.accel_lpf.update(despiked);
        let smoothed_gyro = self.gyro_maf.update(gyro);

        let dt = match self.last_timestamp_ms {
            Some(prev) => elapsed_seconds(prev, sample.timestamp_ms),
            None => self.config.sample_period_s(),
        };
        self.last_timestamp_ms = Some(sample.timestamp_ms);
        self.complementary.update(filtered_accel, smoothed_gyro, dt);

        let detector_input = if self.config.detect_on_filtered_accel {
            filtered_accel
        } else {
            sample.accel
        };
        let prev_phase = self.detector.state();
        let fall_detected = self.detector.update(detector_input, sample.timestamp_ms);
        let phase = self.detector.state();
        if phase != prev_phase {
            self.stats.phase_changes += 1;
        }

        let pitch_deg = self.complementary.pitch();
        let roll_deg = self.complementary.roll();
        if fall_detected {
            self.incidents.push(Incident::fall(
                &self.detector,
                sample.timestamp_ms,
                pitch_deg,
                roll_deg,
            ));
        }

        self.stats.samples_processed += 1;
        self.stats.impacts = self.detector.impacts_seen();
        self.stats.falls = self.detector.falls_detected();

        PipelineOutput {
            timestamp_ms: sample.timestamp_ms,
            filtered_accel,
            smoothed_gyro,
            pitch_deg,
            roll_deg,
            phase,
            fall_detected,
            calibrated: self.calibrator.is_complete(),
        }
    }

    /// Caller confirmed or dismissed the event: re-arm the detector
    pub fn acknowledge(&mut self) {
        self.detector.reset();
    }

    /// Incidents recorded since the last call
    pub fn take_incidents(&mut self) -> Vec<Incident> {
        std::mem::take(&mut self.incidents)
    }

    pub fn phase(&self) -> FallPhase {
        self.detector.state()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector(&self) -> &FallDetector {
        &self.detector
    }

    pub fn calibrator(&self) -> &GyroCalibrator {
        &self.calibrator
    }

    pub fn complementary(&self) -> &ComplementaryFilter {
        &self.complementary
    }
}
