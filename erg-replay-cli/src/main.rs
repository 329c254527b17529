use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use erg_firmware_common::{RowerProfile, RowingEngine};

/// Replays a recorded delta-time log through the rowing engine and prints
/// the resulting metrics. The log format is one inter-edge delta time in
/// microseconds per line, the same stream the firmware broadcasts.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Delta-time log to replay
    log: PathBuf,

    /// Rower profile as JSON; defaults to the built-in profile
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Print a metrics snapshot after every completed stroke
    #[arg(long)]
    per_stroke: bool,
}

fn load_profile(path: Option<&PathBuf>) -> Result<RowerProfile> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading profile {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing profile {}", path.display()))
        }
        None => Ok(RowerProfile::default()),
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    let args = Args::parse();

    let profile = load_profile(args.profile.as_ref())?;
    let mut engine =
        RowingEngine::new(&profile).map_err(|e| anyhow!("invalid profile: {:?}", e))?;

    let content = fs::read_to_string(&args.log)
        .with_context(|| format!("reading log {}", args.log.display()))?;

    // the log starts at an arbitrary point in time; the first edge only
    // arms the engine's baseline
    let mut timestamp_us: u64 = 0;
    engine.on_raw_edge(timestamp_us);

    let mut edges: u64 = 0;
    let mut last_stroke_count = 0;
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let delta_us: u64 = line
            .parse()
            .with_context(|| format!("line {}: not a delta time", index + 1))?;
        timestamp_us += delta_us;
        edges += 1;

        engine.on_raw_edge(timestamp_us);
        engine.on_tick(timestamp_us);

        let metrics = engine.metrics();
        if metrics.stroke_count > last_stroke_count {
            last_stroke_count = metrics.stroke_count;
            log::info!(
                "stroke {} at {:.2} s: distance {:.1} m, drive {} ms, power {:.0} W",
                metrics.stroke_count,
                timestamp_us as f64 / 1e6,
                metrics.distance_m,
                metrics.drive_duration_us / 1000,
                metrics.avg_stroke_power_w,
            );
            if args.per_stroke {
                println!("{}", serde_json::to_string(metrics)?);
            }
        }
    }

    log::info!(
        "replayed {} edges over {:.2} s",
        edges,
        timestamp_us as f64 / 1e6
    );
    println!("{}", serde_json::to_string_pretty(engine.metrics())?);
    Ok(())
}
