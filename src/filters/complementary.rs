use serde::{Deserialize, Serialize};

use crate::error::{ImuError, Result};
use crate::types::Vector3;

/// Typical gyro trust factor
pub const DEFAULT_ALPHA: f32 = 0.98;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplementaryFilterState {
    pub pitch_deg: f32,
    pub roll_deg: f32,
    pub initialized: bool,
}

/// Tilt angles implied by the gravity vector, in degrees: (pitch, roll).
///
/// Undefined (noisy) when the accel magnitude is near zero, e.g. in free fall.
pub fn accel_angles(accel: Vector3) -> (f32, f32) {
    let pitch = (-accel.x)
        .atan2((accel.y * accel.y + accel.z * accel.z).sqrt())
        .to_degrees();
    let roll = accel.y.atan2(accel.z).to_degrees();
    (pitch, roll)
}

/// Pitch/roll estimate fusing integrated gyro rate with accelerometer tilt.
///
/// pitch = α·(pitch + gyro.y·dt) + (1-α)·accel_pitch
/// roll  = α·(roll  + gyro.x·dt) + (1-α)·accel_roll
///
/// Higher α trusts the gyro more through fast motion; lower α pulls drift out faster.
#[derive(Clone, Debug)]
pub struct ComplementaryFilter {
    alpha: f32,
    pitch: f32,
    roll: f32,
    initialized: bool,
}

impl ComplementaryFilter {
    /// `alpha` is expected in (0, 1); see [`Self::try_new`] for a checked constructor
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            pitch: 0.0,
            roll: 0.0,
            initialized: false,
        }
    }

    pub fn try_new(alpha: f32) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ImuError::InvalidParameter(format!(
                "complementary alpha must be in (0, 1) (got {alpha})"
            )));
        }
        Ok(Self::new(alpha))
    }

    /// Fuse one accel (g) / gyro (deg/s) pair. `dt` is in seconds and should be > 0;
    /// dt = 0 freezes the gyro term and leaves only the accel pull.
    ///
    /// The first call seeds pitch/roll from the accelerometer and skips fusion.
    pub fn update(&mut self, accel: Vector3, gyro: Vector3, dt: f32) {
        let (accel_pitch, accel_roll) = accel_angles(accel);

        if !self.initialized {
            self.pitch = accel_pitch;
            self.roll = accel_roll;
            self.initialized = true;
            return;
        }

        self.pitch =
            self.alpha * (self.pitch + gyro.y * dt) + (1.0 - self.alpha) * accel_pitch;
        self.roll = self.alpha * (self.roll + gyro.x * dt) + (1.0 - self.alpha) * accel_roll;
    }

    /// Degrees
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Degrees
    pub fn roll(&self) -> f32 {
        self.roll
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn get_state(&self) -> ComplementaryFilterState {
        ComplementaryFilterState {
            pitch_deg: self.pitch,
            roll_deg: self.roll,
            initialized: self.initialized,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.alpha);
    }
}

impl Default for ComplementaryFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}
