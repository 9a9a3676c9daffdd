//! Simulated IMU driver and recorded sessions.
//!
//! Stands in for the bus driver: produces unit-converted samples (g, deg/s,
//! u32 ms) on a fixed cadence and hands them to the processing side through
//! a bounded channel.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use nalgebra::Rotation3;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

use crate::error::{ImuError, Result};
use crate::types::{ImuSample, NaVector3, Vector3};

/// Stationary lead-in before any scripted motion, long enough to calibrate
pub const LEAD_IN_MS: u32 = 2000;
const FREEFALL_MS: u32 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Device flat and still
    Standing,
    /// Periodic vertical bounce, never below 0.7g
    Walking,
    /// Still, with a one-sample 2.8g spike every second
    Footstep,
    /// Free fall, single-sample impact, then lying on one side
    Fall,
}

/// Gravity as seen by a device rolled `roll_deg` about its x axis
pub fn rolled_gravity(roll_deg: f32) -> Vector3 {
    let rotation = Rotation3::from_axis_angle(&NaVector3::x_axis(), -roll_deg.to_radians());
    (rotation * NaVector3::z()).into()
}

/// Deterministic sample generator for a scripted scenario
#[derive(Clone, Debug)]
pub struct SimulatedImu {
    scenario: Scenario,
    period_ms: u32,
    gyro_bias: Vector3,
    lying: Vector3,
    tick: u32,
}

impl SimulatedImu {
    pub fn new(scenario: Scenario, rate_hz: f32) -> Self {
        let period_ms = (1000.0 / rate_hz).round().max(1.0) as u32;
        Self {
            scenario,
            period_ms,
            gyro_bias: Vector3::new(0.5, -0.3, 0.1),
            lying: rolled_gravity(90.0),
            tick: 0,
        }
    }

    pub fn with_gyro_bias(mut self, bias: Vector3) -> Self {
        self.gyro_bias = bias;
        self
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn next_sample(&mut self) -> ImuSample {
        let t = self.tick.wrapping_mul(self.period_ms);
        let noise = (self.tick as f32 * 1.7).sin() * 0.005;
        self.tick = self.tick.wrapping_add(1);

        let gyro_noise = Vector3::new(noise, -noise, noise * 0.5);
        let still = Vector3::new(noise, -noise, 1.0 + noise);

        let (accel, gyro) = if t < LEAD_IN_MS {
            (still, Vector3::zero())
        } else {
            let rel = t - LEAD_IN_MS;
            let secs = rel as f32 / 1000.0;
            match self.scenario {
                Scenario::Standing => (still, Vector3::zero()),
                Scenario::Walking => {
                    let bounce = (2.0 * PI * 2.0 * secs).sin();
                    (
                        Vector3::new(0.1 * bounce, 0.05 * bounce, 1.0 + 0.3 * bounce),
                        Vector3::new(5.0 * bounce, 3.0 * bounce, 0.0),
                    )
                }
                Scenario::Footstep => {
                    if rel % 1000 < self.period_ms {
                        (Vector3::new(0.3, 0.2, 2.8), Vector3::new(20.0, 0.0, 0.0))
                    } else {
                        (still, Vector3::zero())
                    }
                }
                Scenario::Fall => {
                    if rel < FREEFALL_MS {
                        (Vector3::new(0.05, 0.05, 0.08), Vector3::new(120.0, 40.0, 10.0))
                    } else if rel < FREEFALL_MS + self.period_ms {
                        (Vector3::new(3.5, 2.0, 1.0), Vector3::new(200.0, 80.0, 0.0))
                    } else {
                        (self.lying + Vector3::new(noise, noise, -noise), Vector3::zero())
                    }
                }
            }
        };

        ImuSample::new(accel, gyro + gyro_noise + self.gyro_bias, t)
    }
}

impl Iterator for SimulatedImu {
    type Item = ImuSample;

    fn next(&mut self) -> Option<ImuSample> {
        Some(self.next_sample())
    }
}

/// Emit samples on the simulator's cadence until `max_samples` (if any) or
/// until the receiver is dropped. Full-channel samples are dropped, as a
/// driver ISR would. Returns (sent, dropped).
pub async fn imu_loop(
    tx: Sender<ImuSample>,
    mut imu: SimulatedImu,
    max_samples: Option<u64>,
) -> Result<(u64, u64)> {
    let mut ticker = interval(Duration::from_millis(imu.period_ms() as u64));
    let mut sent = 0u64;
    let mut dropped = 0u64;

    loop {
        if max_samples.is_some_and(|max| sent + dropped >= max) {
            break;
        }
        ticker.tick().await;

        match tx.try_send(imu.next_sample()) {
            Ok(_) => {
                sent += 1;
                if sent % 100 == 0 {
                    debug!("[imu] {} samples", sent);
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!("[imu] Channel closed after {} samples", sent);
                return Err(ImuError::ChannelClosed);
            }
            Err(TrySendError::Full(_)) => {
                dropped += 1;
            }
        }
    }

    Ok((sent, dropped))
}

/// A recorded run, replayable offline
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionLog {
    pub sample_rate_hz: Option<f32>,
    pub samples: Vec<ImuSample>,
}

impl SessionLog {
    /// Read `.json` or `.json.gz`
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if is_gzip(path) {
            Ok(serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?)
        } else {
            Ok(serde_json::from_reader(BufReader::new(file))?)
        }
    }

    /// Write `.json` or `.json.gz`, chosen by extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?;
        } else {
            serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        }
        Ok(())
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}
