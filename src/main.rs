use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

use imu_fall_rs::live_status::LiveStatus;
use imu_fall_rs::sensors::{self, Scenario, SessionLog, SimulatedImu};
use imu_fall_rs::{ImuPipeline, ImuSample, Incident, PipelineConfig, PipelineStats};

#[derive(Parser, Debug)]
#[command(name = "fall_monitor")]
#[command(about = "IMU fall monitor - calibration, tilt tracking and fall detection", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "10")]
    duration: u64,

    /// Simulated motion to feed the pipeline
    #[arg(long, value_enum, default_value = "fall")]
    scenario: Scenario,

    /// Pipeline config (JSON); missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured sample rate (Hz)
    #[arg(long)]
    rate: Option<f32>,

    /// Output directory
    #[arg(long, default_value = "fall_monitor_sessions")]
    output_dir: PathBuf,

    /// Acknowledge each fall immediately and keep monitoring
    #[arg(long, default_value_t = false)]
    auto_ack: bool,

    /// Record raw samples to session_<time>.json.gz for replay
    #[arg(long, default_value_t = false)]
    record: bool,
}

#[derive(Serialize)]
struct Summary {
    scenario: Scenario,
    samples_sent: u64,
    samples_dropped: u64,
    stats: PipelineStats,
    final_phase: String,
    final_pitch_deg: f32,
    final_roll_deg: f32,
    incidents: Vec<Incident>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(rate) = args.rate {
        config.sample_rate_hz = rate;
    }

    println!("[{}] Fall Monitor Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Scenario: {:?}", args.scenario);
    println!("  Sample rate: {} Hz", config.sample_rate_hz);
    println!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)?;

    let imu = SimulatedImu::new(args.scenario, config.sample_rate_hz);
    let mut pipeline = ImuPipeline::new(config.clone())?;

    let max_samples = match args.duration {
        0 => None,
        secs => Some((secs as f32 * config.sample_rate_hz).round() as u64),
    };

    let (imu_tx, mut imu_rx) = mpsc::channel::<ImuSample>(500);
    let imu_handle = tokio::spawn(sensors::imu_loop(imu_tx, imu, max_samples));

    let status_path = args.output_dir.join("live_status.json");
    let start = Utc::now();
    let mut last_status_update = Utc::now();
    let mut recorded: Vec<ImuSample> = Vec::new();
    let mut incidents: Vec<Incident> = Vec::new();
    let mut calibration_reported = false;

    info!("Collecting gyro calibration ({} samples, keep still)", config.gyro_calibration_samples);

    while let Some(sample) = imu_rx.recv().await {
        if args.record {
            recorded.push(sample);
        }

        let output = pipeline.process(&sample);

        if output.calibrated && !calibration_reported {
            let bias = pipeline.calibrator().bias();
            println!(
                "[{}] Gyro calibration complete: bias ({:.3}, {:.3}, {:.3}) deg/s",
                ts_now(),
                bias.x,
                bias.y,
                bias.z
            );
            calibration_reported = true;
        }

        if output.fall_detected {
            for incident in pipeline.take_incidents() {
                match incident.save(&args.output_dir) {
                    Ok(path) => warn!("Fall at {}ms, incident written to {}", incident.timestamp_ms, path.display()),
                    Err(e) => warn!("Fall at {}ms, failed to write incident: {}", incident.timestamp_ms, e),
                }
                incidents.push(incident);
            }
            if args.auto_ack {
                pipeline.acknowledge();
            }
        }

        let now = Utc::now();
        if now.signed_duration_since(last_status_update).num_seconds() >= 2 {
            let uptime = now.signed_duration_since(start).num_seconds().max(0) as u64;
            if let Err(e) = LiveStatus::from_pipeline(&pipeline, uptime).save(&status_path) {
                warn!("Failed to write live status: {}", e);
            }
            last_status_update = now;
        }
    }

    let (samples_sent, samples_dropped) = match imu_handle.await? {
        Ok(counts) => counts,
        Err(e) => {
            warn!("IMU task ended early: {}", e);
            (pipeline.stats().samples_processed, 0)
        }
    };

    let uptime = Utc::now().signed_duration_since(start).num_seconds().max(0) as u64;
    let mut final_status = LiveStatus::from_pipeline(&pipeline, uptime);
    final_status.samples_dropped = samples_dropped;
    final_status.save(&args.output_dir.join("live_status_final.json"))?;

    if args.record {
        let path = args
            .output_dir
            .join(format!("session_{}.json.gz", Utc::now().format("%Y%m%d_%H%M%S")));
        SessionLog {
            sample_rate_hz: Some(config.sample_rate_hz),
            samples: recorded,
        }
        .save(&path)?;
        println!("[{}] Session recorded to {}", ts_now(), path.display());
    }

    let summary = Summary {
        scenario: args.scenario,
        samples_sent,
        samples_dropped,
        stats: pipeline.stats().clone(),
        final_phase: pipeline.phase().to_string(),
        final_pitch_deg: pipeline.complementary().pitch(),
        final_roll_deg: pipeline.complementary().roll(),
        incidents,
    };

    println!("\n=== Final Stats ===");
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
