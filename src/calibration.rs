use crate::types::Vector3;
use log::info;

/// Stationary samples averaged to learn the gyro bias
pub const DEFAULT_CALIBRATION_SAMPLES: usize = 100;

/// Learns a per-axis gyro offset from the first N samples, then subtracts it.
///
/// The device must be stationary while samples are collected; nothing here can
/// verify that. `apply` works before completion (zero bias) so calibration
/// never blocks the data path.
#[derive(Clone, Debug)]
pub struct GyroCalibrator {
    sum: Vector3,
    count: usize,
    required: usize,
    complete: bool,
    bias: Vector3,
}

impl GyroCalibrator {
    pub fn new() -> Self {
        Self::with_samples(DEFAULT_CALIBRATION_SAMPLES)
    }

    /// Calibrate over `samples` readings (0 is treated as 1)
    pub fn with_samples(samples: usize) -> Self {
        GyroCalibrator {
            sum: Vector3::zero(),
            count: 0,
            required: samples.max(1),
            complete: false,
            bias: Vector3::zero(),
        }
    }

    /// Accumulate one stationary reading. Returns true once the bias is latched;
    /// samples after that are ignored.
    pub fn add_sample(&mut self, gyro: Vector3) -> bool {
        if self.complete {
            return true;
        }

        self.sum += gyro;
        self.count += 1;

        if self.count >= self.required {
            self.bias = self.sum / self.count as f32;
            self.complete = true;
            info!(
                "[GYRO CAL] Bias: X={:.3}, Y={:.3}, Z={:.3} deg/s ({} samples)",
                self.bias.x, self.bias.y, self.bias.z, self.count
            );
        }

        self.complete
    }

    /// Subtract the learned bias per axis
    pub fn apply(&self, gyro: Vector3) -> Vector3 {
        gyro - self.bias
    }

    pub fn bias(&self) -> Vector3 {
        self.bias
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// (samples collected, samples required)
    pub fn progress(&self) -> (usize, usize) {
        (self.count, self.required)
    }

    /// Discard the learned bias and start collecting again
    pub fn reset(&mut self) {
        *self = Self::with_samples(self.required);
    }
}

impl Default for GyroCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bias_recovery() {
        let mut cal = GyroCalibrator::new();
        let sample = Vector3::new(0.5, -0.3, 0.1);
        for i in 0..DEFAULT_CALIBRATION_SAMPLES {
            let done = cal.add_sample(sample);
            assert_eq!(done, i + 1 == DEFAULT_CALIBRATION_SAMPLES);
        }
        assert!(cal.is_complete());

        let bias = cal.bias();
        assert_abs_diff_eq!(bias.x, 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(bias.y, -0.3, epsilon = 1e-5);
        assert_abs_diff_eq!(bias.z, 0.1, epsilon = 1e-5);

        let corrected = cal.apply(sample);
        assert_abs_diff_eq!(corrected.x, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(corrected.y, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(corrected.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_apply_before_complete_is_noop() {
        let mut cal = GyroCalibrator::new();
        cal.add_sample(Vector3::new(1.0, 1.0, 1.0));
        let raw = Vector3::new(4.0, -2.0, 0.5);
        assert_eq!(cal.apply(raw), raw);
        assert_eq!(cal.progress(), (1, DEFAULT_CALIBRATION_SAMPLES));
    }

    #[test]
    fn test_samples_after_complete_ignored() {
        let mut cal = GyroCalibrator::with_samples(4);
        for _ in 0..4 {
            cal.add_sample(Vector3::new(2.0, 0.0, -2.0));
        }
        assert!(cal.add_sample(Vector3::new(100.0, 100.0, 100.0)));
        assert_eq!(cal.bias(), Vector3::new(2.0, 0.0, -2.0));
        assert_eq!(cal.progress(), (4, 4));
    }

    #[test]
    fn test_averages_noisy_samples() {
        let mut cal = GyroCalibrator::with_samples(4);
        cal.add_sample(Vector3::new(1.0, 0.0, 0.0));
        cal.add_sample(Vector3::new(3.0, 0.0, 0.0));
        cal.add_sample(Vector3::new(2.0, 1.0, 0.0));
        cal.add_sample(Vector3::new(2.0, -1.0, 4.0));
        assert_eq!(cal.bias(), Vector3::new(2.0, 0.0, 1.0));
    }

    #[test]
    fn test_reset() {
        let mut cal = GyroCalibrator::with_samples(2);
        cal.add_sample(Vector3::new(1.0, 1.0, 1.0));
        cal.add_sample(Vector3::new(1.0, 1.0, 1.0));
        cal.reset();
        assert!(!cal.is_complete());
        assert_eq!(cal.bias(), Vector3::zero());
        assert_eq!(cal.progress(), (0, 2));
    }
}
