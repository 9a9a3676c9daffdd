//! Three-phase fall detection: free fall, then impact, then lying still.
//!
//! A single impact threshold fires on hard footsteps, jumps and dropped
//! devices. Requiring all three phases in order, each inside its time window,
//! is what keeps the false-positive rate down.
//!
//! ```text
//! Normal --(m < freefall)--> FreeFall --(m > impact, elapsed >= min)--> Impact
//!   ^                           |  (m > impact too early, or window expired)   |
//!   +---------------------------+                                              |
//!   +--(settle timeout)------------------------------------------------------ +
//!   |                                                       (variance < thr)  v
//!   +--(variance rises)---------------------------------------------- Motionless
//!                                                       (still for duration)  |
//!                                                  Detected <-----------------+
//! ```
//!
//! `Detected` latches until [`FallDetector::reset`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ensure_positive, ImuError, Result};
use crate::types::Vector3;
use log::{debug, info, warn};

/// Slots in the magnitude history ring
pub const HISTORY_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallPhase {
    Normal,
    FreeFall,
    Impact,
    Motionless,
    Detected,
}

impl fmt::Display for FallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FallPhase::Normal => "Normal",
            FallPhase::FreeFall => "FreeFall",
            FallPhase::Impact => "Impact",
            FallPhase::Motionless => "Motionless",
            FallPhase::Detected => "Detected",
        };
        f.write_str(name)
    }
}

/// Which history samples the stillness variance is computed over
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceScope {
    /// Only samples pushed after the impact sample, up to `HISTORY_LEN`
    #[default]
    PostImpact,
    /// All `HISTORY_LEN` slots, including pre-impact samples and the zero fill
    /// of a fresh detector
    FullHistory,
}

/// Tunable thresholds and windows. Magnitudes in g, durations in ms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallDetectorConfig {
    pub freefall_threshold_g: f32,
    pub impact_threshold_g: f32,
    /// Population variance (g²) below which the wearer counts as still
    pub motionless_variance: f32,
    pub freefall_min_duration_ms: u32,
    /// Free fall without an impact for longer than this is abandoned
    pub impact_window_ms: u32,
    /// Impact without stillness for longer than this is abandoned
    pub impact_settle_ms: u32,
    pub motionless_duration_ms: u32,
    pub variance_scope: VarianceScope,
    /// Post-impact samples required before variance is judged (PostImpact scope)
    pub min_variance_samples: usize,
}

impl Default for FallDetectorConfig {
    fn default() -> Self {
        Self {
            freefall_threshold_g: 0.4,
            impact_threshold_g: 2.5,
            motionless_variance: 0.1,
            freefall_min_duration_ms: 100,
            impact_window_ms: 500,
            impact_settle_ms: 1000,
            motionless_duration_ms: 2000,
            variance_scope: VarianceScope::PostImpact,
            min_variance_samples: 1,
        }
    }
}

impl FallDetectorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("freefall_threshold_g", self.freefall_threshold_g)?;
        ensure_positive("impact_threshold_g", self.impact_threshold_g)?;
        ensure_positive("motionless_variance", self.motionless_variance)?;
        if self.freefall_threshold_g >= self.impact_threshold_g {
            return Err(ImuError::InvalidParameter(format!(
                "freefall threshold ({}g) must be below impact threshold ({}g)",
                self.freefall_threshold_g, self.impact_threshold_g
            )));
        }
        if !(1..=HISTORY_LEN).contains(&self.min_variance_samples) {
            return Err(ImuError::InvalidParameter(format!(
                "min_variance_samples must be in 1..={HISTORY_LEN} (got {})",
                self.min_variance_samples
            )));
        }
        Ok(())
    }
}

/// Uniform (biased) population variance, recomputed from scratch
pub fn population_variance(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f32;
    let mean = data.iter().sum::<f32>() / n;
    data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n
}

/// Fixed ring of the last `HISTORY_LEN` acceleration magnitudes, zero-filled at start
#[derive(Clone, Debug)]
pub struct MagnitudeHistory {
    samples: [f32; HISTORY_LEN],
    index: usize,
    pushed: u64,
}

impl MagnitudeHistory {
    pub fn new() -> Self {
        Self {
            samples: [0.0; HISTORY_LEN],
            index: 0,
            pushed: 0,
        }
    }

    pub fn push(&mut self, magnitude: f32) {
        self.samples[self.index] = magnitude;
        self.index = (self.index + 1) % HISTORY_LEN;
        self.pushed += 1;
    }

    /// Total samples ever pushed
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Variance over every slot, as stored
    pub fn variance(&self) -> f32 {
        population_variance(&self.samples)
    }

    /// Variance over the `n` most recent samples (clamped to 1..=HISTORY_LEN)
    pub fn recent_variance(&self, n: usize) -> f32 {
        let n = n.clamp(1, HISTORY_LEN);
        let mut window = [0.0f32; HISTORY_LEN];
        for (i, slot) in window.iter_mut().take(n).enumerate() {
            let idx = (self.index + HISTORY_LEN - 1 - i) % HISTORY_LEN;
            *slot = self.samples[idx];
        }
        population_variance(&window[..n])
    }

    /// Most recently pushed magnitude
    pub fn latest(&self) -> f32 {
        self.samples[(self.index + HISTORY_LEN - 1) % HISTORY_LEN]
    }
}

impl Default for MagnitudeHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Fall detection state machine, fed one sample per tick.
///
/// Timestamps must be non-decreasing. A single u32 wrap is handled by wrapping
/// subtraction; a timestamp earlier than the phase entry reads as "phase just
/// entered" (elapsed 0).
#[derive(Clone, Debug)]
pub struct FallDetector {
    config: FallDetectorConfig,
    phase: FallPhase,
    phase_start_ms: u32,
    history: MagnitudeHistory,
    // history.pushed() right after the impact sample
    impact_mark: u64,
    last_variance: Option<f32>,
    peak_magnitude: f32,
    impacts_seen: u32,
    falls_detected: u32,
}

impl FallDetector {
    pub fn new() -> Self {
        Self::with_config(FallDetectorConfig::default())
    }

    pub fn with_config(config: FallDetectorConfig) -> Self {
        Self {
            config,
            phase: FallPhase::Normal,
            phase_start_ms: 0,
            history: MagnitudeHistory::new(),
            impact_mark: 0,
            last_variance: None,
            peak_magnitude: 0.0,
            impacts_seen: 0,
            falls_detected: 0,
        }
    }

    /// Feed one accelerometer reading (g). Returns true only on the tick that
    /// enters `Detected`.
    pub fn update(&mut self, accel: Vector3, timestamp_ms: u32) -> bool {
        self.update_magnitude(accel.magnitude(), timestamp_ms)
    }

    /// Same as [`Self::update`] for callers that already hold |a|
    pub fn update_magnitude(&mut self, magnitude: f32, timestamp_ms: u32) -> bool {
        self.history.push(magnitude);
        self.last_variance = None;

        let elapsed = self.elapsed_checked(timestamp_ms);

        match self.phase {
            FallPhase::Normal => {
                if magnitude < self.config.freefall_threshold_g {
                    self.enter(FallPhase::FreeFall, timestamp_ms, magnitude);
                }
            }
            FallPhase::FreeFall => {
                if magnitude > self.config.impact_threshold_g {
                    if elapsed >= self.config.freefall_min_duration_ms {
                        self.enter(FallPhase::Impact, timestamp_ms, magnitude);
                        self.impact_mark = self.history.pushed();
                        self.peak_magnitude = magnitude;
                        self.impacts_seen += 1;
                    } else {
                        // Dip too short to be a real fall
                        self.enter(FallPhase::Normal, timestamp_ms, magnitude);
                    }
                } else if elapsed > self.config.impact_window_ms {
                    self.enter(FallPhase::Normal, timestamp_ms, magnitude);
                }
            }
            FallPhase::Impact => {
                self.peak_magnitude = self.peak_magnitude.max(magnitude);
                match self.stillness_variance() {
                    Some(var) if var < self.config.motionless_variance => {
                        self.enter(FallPhase::Motionless, timestamp_ms, magnitude);
                    }
                    _ if elapsed > self.config.impact_settle_ms => {
                        // Still moving, not a collapse
                        self.enter(FallPhase::Normal, timestamp_ms, magnitude);
                    }
                    _ => {}
                }
            }
            FallPhase::Motionless => {
                self.peak_magnitude = self.peak_magnitude.max(magnitude);
                match self.stillness_variance() {
                    Some(var) if var < self.config.motionless_variance => {
                        if elapsed >= self.config.motionless_duration_ms {
                            self.enter(FallPhase::Detected, timestamp_ms, magnitude);
                            self.falls_detected += 1;
                            info!(
                                "[FALL] *** FALL DETECTED *** (peak {:.2}g, still {}ms)",
                                self.peak_magnitude, elapsed
                            );
                            return true;
                        }
                    }
                    // Not enough post-impact samples yet; keep waiting
                    None => {}
                    Some(_) => {
                        // Moving again
                        self.enter(FallPhase::Normal, timestamp_ms, magnitude);
                    }
                }
            }
            FallPhase::Detected => {}
        }

        false
    }

    /// Return to `Normal` from any phase. History is kept.
    pub fn reset(&mut self) {
        if self.phase != FallPhase::Normal {
            info!("[FALL] Reset from {}", self.phase);
        }
        self.phase = FallPhase::Normal;
        self.last_variance = None;
        self.peak_magnitude = 0.0;
    }

    pub fn state(&self) -> FallPhase {
        self.phase
    }

    pub fn config(&self) -> &FallDetectorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FallDetectorConfig {
        &mut self.config
    }

    pub fn history(&self) -> &MagnitudeHistory {
        &self.history
    }

    /// Variance computed on the last update, if the phase evaluated one
    pub fn last_variance(&self) -> Option<f32> {
        self.last_variance
    }

    pub fn last_magnitude(&self) -> f32 {
        self.history.latest()
    }

    /// Largest magnitude since the current impact
    pub fn peak_magnitude(&self) -> f32 {
        self.peak_magnitude
    }

    pub fn impacts_seen(&self) -> u32 {
        self.impacts_seen
    }

    pub fn falls_detected(&self) -> u32 {
        self.falls_detected
    }

    /// Milliseconds since the current phase was entered (0 for backwards timestamps)
    pub fn phase_elapsed_ms(&self, now_ms: u32) -> u32 {
        let elapsed = now_ms.wrapping_sub(self.phase_start_ms);
        if elapsed > i32::MAX as u32 {
            0
        } else {
            elapsed
        }
    }

    fn elapsed_checked(&self, now_ms: u32) -> u32 {
        let elapsed = self.phase_elapsed_ms(now_ms);
        if elapsed == 0 && now_ms != self.phase_start_ms && self.phase != FallPhase::Normal {
            warn!(
                "[FALL] Timestamp {}ms is before {} entry at {}ms",
                now_ms, self.phase, self.phase_start_ms
            );
        }
        elapsed
    }

    fn stillness_variance(&mut self) -> Option<f32> {
        let variance = match self.config.variance_scope {
            VarianceScope::FullHistory => self.history.variance(),
            VarianceScope::PostImpact => {
                let since = (self.history.pushed() - self.impact_mark) as usize;
                if since < self.config.min_variance_samples {
                    return None;
                }
                self.history.recent_variance(since.min(HISTORY_LEN))
            }
        };
        debug!("[FALL] {} variance={:.4}", self.phase, variance);
        self.last_variance = Some(variance);
        Some(variance)
    }

    fn enter(&mut self, phase: FallPhase, timestamp_ms: u32, magnitude: f32) {
        if phase != FallPhase::Detected {
            info!("[FALL] {} -> {} ({:.2}g)", self.phase, phase, magnitude);
        }
        self.phase = phase;
        self.phase_start_ms = timestamp_ms;
    }
}

impl Default for FallDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reference_trace() -> Vec<(Vector3, u32)> {
        vec![
            (Vector3::new(0.0, 0.0, 1.0), 0),
            (Vector3::new(0.1, 0.1, 0.1), 100),
            (Vector3::new(0.05, 0.05, 0.05), 200),
            (Vector3::new(3.5, 2.0, 1.0), 300),
            (Vector3::new(0.0, 0.0, 1.0), 500),
            (Vector3::new(0.01, 0.01, 1.0), 1000),
            (Vector3::new(0.0, 0.02, 1.0), 2000),
            (Vector3::new(0.01, 0.0, 1.0), 3000),
        ]
    }

    #[test]
    fn test_reference_fall_trace() {
        let mut fd = FallDetector::new();
        let expected = [
            FallPhase::Normal,
            FallPhase::FreeFall,
            FallPhase::FreeFall,
            FallPhase::Impact,
            FallPhase::Motionless,
            FallPhase::Motionless,
            FallPhase::Motionless,
            FallPhase::Detected,
        ];
        for (i, (accel, ts)) in reference_trace().into_iter().enumerate() {
            let fired = fd.update(accel, ts);
            assert_eq!(fd.state(), expected[i], "at t={ts}");
            assert_eq!(fired, ts == 3000, "at t={ts}");
        }
        assert_eq!(fd.impacts_seen(), 1);
        assert_eq!(fd.falls_detected(), 1);
        assert!(fd.peak_magnitude() > 4.0);
    }

    #[test]
    fn test_full_history_scope_rejects_reference_trace() {
        // With all 16 slots the impact sample and the zero fill keep variance
        // near 1.05, so the reference trace never reaches Motionless.
        let config = FallDetectorConfig {
            variance_scope: VarianceScope::FullHistory,
            ..Default::default()
        };
        let mut fd = FallDetector::with_config(config);
        let mut fired = false;
        for (accel, ts) in reference_trace() {
            fired |= fd.update(accel, ts);
            if ts == 1000 {
                assert_eq!(fd.state(), FallPhase::Impact);
                assert!(fd.last_variance().unwrap() > 1.0);
            }
        }
        assert!(!fired);
        assert_eq!(fd.state(), FallPhase::Normal);
    }

    #[test]
    fn test_detected_fires_once_and_latches() {
        let mut fd = FallDetector::new();
        for (accel, ts) in reference_trace() {
            fd.update(accel, ts);
        }
        assert_eq!(fd.state(), FallPhase::Detected);
        for ts in (3100..6000).step_by(100) {
            assert!(!fd.update(Vector3::new(0.0, 0.0, 1.0), ts));
            assert_eq!(fd.state(), FallPhase::Detected);
        }
        // Even a new free fall does not re-arm
        assert!(!fd.update(Vector3::new(0.0, 0.0, 0.1), 6100));
        assert_eq!(fd.state(), FallPhase::Detected);
    }

    #[test]
    fn test_footstep_spike_stays_normal() {
        let mut fd = FallDetector::new();
        let magnitudes = [1.0f32, 1.0, 2.5, 1.0, 1.0, 3.2, 1.1, 0.9, 1.0];
        for (i, m) in magnitudes.iter().enumerate() {
            let fired = fd.update(Vector3::new(0.0, 0.0, *m), i as u32 * 10);
            assert!(!fired);
            assert_eq!(fd.state(), FallPhase::Normal);
        }
        assert_eq!(fd.impacts_seen(), 0);
    }

    #[test]
    fn test_freefall_timeout_returns_normal() {
        let mut fd = FallDetector::new();
        fd.update(Vector3::new(0.0, 0.0, 1.0), 0);
        fd.update(Vector3::new(0.0, 0.0, 0.2), 100);
        assert_eq!(fd.state(), FallPhase::FreeFall);

        // Deceleration stops without a landing; window is exclusive at 500ms
        for ts in (150..=600).step_by(50) {
            fd.update(Vector3::new(0.0, 0.0, 1.0), ts);
            assert_eq!(fd.state(), FallPhase::FreeFall, "at t={ts}");
        }
        fd.update(Vector3::new(0.0, 0.0, 1.0), 650);
        assert_eq!(fd.state(), FallPhase::Normal);
    }

    #[test]
    fn test_short_dip_then_spike_is_rejected() {
        let mut fd = FallDetector::new();
        fd.update(Vector3::new(0.0, 0.0, 0.3), 1000);
        assert_eq!(fd.state(), FallPhase::FreeFall);
        // Impact 50ms into free fall: below the 100ms minimum
        fd.update(Vector3::new(0.0, 0.0, 3.0), 1050);
        assert_eq!(fd.state(), FallPhase::Normal);
        assert_eq!(fd.impacts_seen(), 0);
    }

    #[test]
    fn test_freefall_min_duration_boundary() {
        let mut fd = FallDetector::new();
        fd.update(Vector3::new(0.0, 0.0, 0.3), 1000);
        fd.update(Vector3::new(0.0, 0.0, 3.0), 1100);
        assert_eq!(fd.state(), FallPhase::Impact);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let mut fd = FallDetector::new();
        // Exactly at the free-fall threshold is not free fall
        fd.update_magnitude(0.4, 0);
        assert_eq!(fd.state(), FallPhase::Normal);
        fd.update_magnitude(0.39, 10);
        assert_eq!(fd.state(), FallPhase::FreeFall);
        // Exactly at the impact threshold is not an impact
        fd.update_magnitude(2.5, 200);
        assert_eq!(fd.state(), FallPhase::FreeFall);
        fd.update_magnitude(2.51, 210);
        assert_eq!(fd.state(), FallPhase::Impact);
    }

    #[test]
    fn test_movement_after_impact_is_false_alarm() {
        let mut fd = FallDetector::new();
        fd.update_magnitude(1.0, 0);
        fd.update_magnitude(0.2, 100);
        fd.update_magnitude(3.0, 250);
        assert_eq!(fd.state(), FallPhase::Impact);

        // Walking away: alternating magnitudes
        let mut ts = 300;
        let mut saw_normal = false;
        for i in 0..20 {
            let m = if i % 2 == 0 { 0.6 } else { 1.8 };
            assert!(!fd.update_magnitude(m, ts));
            saw_normal |= fd.state() == FallPhase::Normal;
            ts += 50;
        }
        assert!(saw_normal);
        assert_ne!(fd.state(), FallPhase::Detected);
    }

    #[test]
    fn test_impact_settle_timeout() {
        let config = FallDetectorConfig {
            variance_scope: VarianceScope::FullHistory,
            ..Default::default()
        };
        let mut fd = FallDetector::with_config(config);
        fd.update_magnitude(1.0, 0);
        fd.update_magnitude(0.1, 100);
        fd.update_magnitude(3.0, 250);
        assert_eq!(fd.state(), FallPhase::Impact);

        let mut ts = 350;
        let mut i = 0;
        while ts <= 1250 {
            let m = if i % 2 == 0 { 0.5 } else { 1.8 };
            fd.update_magnitude(m, ts);
            assert_eq!(fd.state(), FallPhase::Impact, "at t={ts}");
            ts += 100;
            i += 1;
        }
        fd.update_magnitude(1.8, 1350);
        assert_eq!(fd.state(), FallPhase::Normal);
    }

    #[test]
    fn test_min_variance_samples_delays_judgement() {
        let config = FallDetectorConfig {
            min_variance_samples: 3,
            ..Default::default()
        };
        let mut fd = FallDetector::with_config(config);
        fd.update_magnitude(0.2, 0);
        fd.update_magnitude(3.0, 200);
        fd.update_magnitude(1.0, 300);
        assert_eq!(fd.state(), FallPhase::Impact);
        assert!(fd.last_variance().is_none());
        fd.update_magnitude(1.0, 400);
        assert_eq!(fd.state(), FallPhase::Impact);
        fd.update_magnitude(1.0, 500);
        assert_eq!(fd.state(), FallPhase::Motionless);
    }

    #[test]
    fn test_reset_from_every_phase() {
        let trace = reference_trace();
        for stop in 0..trace.len() {
            let mut fd = FallDetector::new();
            for (accel, ts) in trace.iter().take(stop + 1) {
                fd.update(*accel, *ts);
            }
            fd.reset();
            assert_eq!(fd.state(), FallPhase::Normal);
            fd.reset();
            assert_eq!(fd.state(), FallPhase::Normal);
        }
    }

    #[test]
    fn test_reset_then_retrigger() {
        let mut fd = FallDetector::new();
        for (accel, ts) in reference_trace() {
            fd.update(accel, ts);
        }
        assert_eq!(fd.state(), FallPhase::Detected);
        fd.reset();

        let mut fired = false;
        for (accel, ts) in reference_trace() {
            fired |= fd.update(accel, ts + 10_000);
        }
        assert!(fired);
        assert_eq!(fd.state(), FallPhase::Detected);
        assert_eq!(fd.falls_detected(), 2);
    }

    #[test]
    fn test_timestamp_wraparound() {
        let mut fd = FallDetector::new();
        let start = u32::MAX - 50;
        fd.update_magnitude(0.2, start);
        assert_eq!(fd.state(), FallPhase::FreeFall);
        // 151ms later, after the counter wrapped
        fd.update_magnitude(3.0, 100);
        assert_eq!(fd.state(), FallPhase::Impact);
        assert_eq!(fd.phase_elapsed_ms(150), 50);
    }

    #[test]
    fn test_backwards_timestamp_reads_as_phase_start() {
        let mut fd = FallDetector::new();
        fd.update_magnitude(0.2, 1000);
        assert_eq!(fd.phase_elapsed_ms(900), 0);
        // Clamped elapsed of 0 is below the free-fall minimum
        fd.update_magnitude(3.0, 900);
        assert_eq!(fd.state(), FallPhase::Normal);
    }

    #[test]
    fn test_history_ring() {
        let mut history = MagnitudeHistory::new();
        assert_eq!(history.variance(), 0.0);
        for i in 0..20 {
            history.push(i as f32);
        }
        assert_eq!(history.pushed(), 20);
        assert_eq!(history.latest(), 19.0);
        // Two most recent: 18, 19
        assert_abs_diff_eq!(history.recent_variance(2), 0.25, epsilon = 1e-6);
        // Slots hold 4..=19: variance of 16 consecutive integers = (16² - 1) / 12
        assert_abs_diff_eq!(history.variance(), 21.25, epsilon = 1e-4);
        assert_abs_diff_eq!(history.recent_variance(100), history.variance(), epsilon = 1e-6);
    }

    #[test]
    fn test_population_variance() {
        assert_eq!(population_variance(&[]), 0.0);
        assert_eq!(population_variance(&[3.0]), 0.0);
        assert_abs_diff_eq!(population_variance(&[1.0, 3.0]), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_config_validation() {
        assert!(FallDetectorConfig::default().validate().is_ok());
        let inverted = FallDetectorConfig {
            freefall_threshold_g: 3.0,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
        let no_samples = FallDetectorConfig {
            min_variance_samples: 0,
            ..Default::default()
        };
        assert!(no_samples.validate().is_err());
    }

    #[test]
    fn test_config_overrides_from_json() {
        let config: FallDetectorConfig =
            serde_json::from_str(r#"{"impact_threshold_g": 3.0, "variance_scope": "full_history"}"#)
                .unwrap();
        assert_eq!(config.impact_threshold_g, 3.0);
        assert_eq!(config.freefall_threshold_g, 0.4);
        assert_eq!(config.variance_scope, VarianceScope::FullHistory);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(FallPhase::FreeFall.to_string(), "FreeFall");
        assert_eq!(
            serde_json::to_string(&FallPhase::Motionless).unwrap(),
            "\"motionless\""
        );
    }
}
