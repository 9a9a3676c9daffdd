//! IMU signal conditioning and fall detection.
//!
//! Raw 6-axis samples (g, deg/s, ms) go through gyro bias calibration, a
//! low-pass on the accelerometer, a moving average on the gyro, a
//! complementary tilt filter and the fall state machine. [`ImuPipeline`]
//! wires these together per tick; each stage is also usable on its own.

pub mod calibration;
pub mod config;
pub mod error;
pub mod fall_detector;
pub mod filters;
pub mod incident;
pub mod live_status;
pub mod pipeline;
pub mod sensors;
pub mod smoothing;
pub mod types;

pub use calibration::GyroCalibrator;
pub use config::PipelineConfig;
pub use error::{ImuError, Result};
pub use fall_detector::{FallDetector, FallDetectorConfig, FallPhase, VarianceScope};
pub use filters::ComplementaryFilter;
pub use incident::Incident;
pub use pipeline::{ImuPipeline, PipelineOutput, PipelineStats};
pub use smoothing::{LowPassFilter, MedianFilter, MovingAverageFilter};
pub use types::{ImuSample, Vector3};
