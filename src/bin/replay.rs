use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::json;

use imu_fall_rs::sensors::SessionLog;
use imu_fall_rs::{FallPhase, ImuPipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "replay", about = "Replay recorded IMU sessions through the fall pipeline")]
struct Args {
    /// Path to a session_*.json[.gz] log
    #[arg(long, conflicts_with = "session_dir")]
    log: Option<PathBuf>,

    /// Directory of session logs to batch replay (processes session_*.json[.gz])
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Pipeline config (JSON); missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Acknowledge each fall and keep going, so later falls are counted too
    #[arg(long, default_value_t = false)]
    ack_after_detect: bool,
}

fn run_once(path: &Path, config: &PipelineConfig, args: &Args) -> anyhow::Result<serde_json::Value> {
    let log = SessionLog::load(path)?;

    let mut config = config.clone();
    if args.config.is_none() {
        if let Some(rate) = log.sample_rate_hz {
            config.sample_rate_hz = rate;
        }
    }
    let mut pipeline = ImuPipeline::new(config)?;

    let mut transitions = Vec::new();
    let mut incidents = Vec::new();
    let mut phase = FallPhase::Normal;
    let mut min_magnitude = f32::INFINITY;
    let mut max_magnitude = 0.0f32;

    for sample in &log.samples {
        let magnitude = sample.accel.magnitude();
        min_magnitude = min_magnitude.min(magnitude);
        max_magnitude = max_magnitude.max(magnitude);

        let output = pipeline.process(sample);
        if output.phase != phase {
            transitions.push(json!({
                "timestamp_ms": output.timestamp_ms,
                "from": phase,
                "to": output.phase,
            }));
            phase = output.phase;
        }
        if output.fall_detected {
            incidents.extend(pipeline.take_incidents());
            if args.ack_after_detect {
                pipeline.acknowledge();
                phase = pipeline.phase();
            }
        }
    }

    if log.samples.is_empty() {
        min_magnitude = 0.0;
    }

    Ok(json!({
        "log": path.display().to_string(),
        "samples": log.samples.len(),
        "accel_magnitude_g": {
            "min": min_magnitude,
            "max": max_magnitude,
        },
        "gyro_bias": pipeline.calibrator().bias(),
        "transitions": transitions,
        "incidents": incidents,
        "final_phase": pipeline.phase(),
        "final_pitch_deg": pipeline.complementary().pitch(),
        "final_roll_deg": pipeline.complementary().roll(),
        "stats": pipeline.stats(),
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let mut results = Vec::new();

    if let Some(dir) = args.session_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(name.starts_with("session_") && (name.ends_with(".json") || name.ends_with(".json.gz"))) {
                continue;
            }
            match run_once(&path, &config, &args) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config, &args)?);
    } else {
        anyhow::bail!("Provide --log or --session-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
