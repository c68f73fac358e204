// src/main.rs
use anyhow::{Context, Result};
use chrono::Local;
use mocap_rig::simulation::SimulatedPerformer;
use mocap_rig::{PipelineConfig, PoseFrame, PoseTracker, SkeletonRig};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

const SIMULATED_FRAMES: usize = 300;

/// First output line; labels the frames that follow.
#[derive(Serialize)]
struct SessionHeader<'a> {
    session: &'a str,
    started_at: String,
    source: String,
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    session: &'a str,
    /// The frame's own counter, or its position in the input when unnumbered.
    sequence: u64,
    timestamp: f64,
    /// Milliseconds since the session started.
    elapsed_ms: i64,
    rig: &'a SkeletonRig,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let frames_path = args.next().map(PathBuf::from);

    let config = load_config(config_path)?;
    let mut rig = SkeletonRig::humanoid();
    let mut tracker = PoseTracker::with_default_rest(config, &rig).context("Failed to bind rig")?;

    let source = frames_path
        .as_ref()
        .map_or_else(|| "simulation".to_string(), |p| p.display().to_string());
    let frames: Box<dyn Iterator<Item = Result<PoseFrame>>> = match frames_path {
        Some(path) => {
            info!(path = %path.display(), "Replaying recorded frames");
            let file = File::open(&path).with_context(|| format!("Cannot open {}", path.display()))?;
            Box::new(
                BufReader::new(file)
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
                    .map(|(n, line)| {
                        let line = line?;
                        serde_json::from_str::<PoseFrame>(&line)
                            .with_context(|| format!("Invalid frame on line {}", n + 1))
                    }),
            )
        }
        None => {
            info!(frames = SIMULATED_FRAMES, "No frame file given, using simulation mode");
            Box::new(SimulatedPerformer::new(30.0).take(SIMULATED_FRAMES).map(Ok))
        }
    };

    let started_at = Local::now();
    let session_name = format!("session_{}", started_at.format("%Y%m%d_%H%M%S"));
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let header = SessionHeader {
        session: &session_name,
        started_at: started_at.to_rfc3339(),
        source,
    };
    serde_json::to_writer(&mut out, &header)?;
    writeln!(out)?;

    for (index, frame) in frames.enumerate() {
        let frame = frame?;
        let report = tracker.process_frame(&frame, &mut rig)?;
        if report.stale {
            continue;
        }

        let line = FrameOutput {
            session: &session_name,
            sequence: output_sequence(&frame, index),
            timestamp: frame.timestamp,
            elapsed_ms: (Local::now() - started_at).num_milliseconds(),
            rig: &rig,
        };
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
    }
    out.flush()?;

    let metrics = tracker.metrics();
    info!(
        session = %session_name,
        frames = metrics.frames_processed,
        dropped = metrics.frames_dropped,
        solved = metrics.chains_solved,
        skipped = metrics.chains_skipped,
        degraded = metrics.degraded_solves,
        unconverged = metrics.unconverged_solves,
        restarts = metrics.stream_restarts,
        "Session complete"
    );

    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> Result<PipelineConfig> {
    if let Some(path) = explicit {
        return PipelineConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()));
    }

    match PipelineConfig::default_path() {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Using user config");
            PipelineConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
        }
        _ => {
            warn!("No config file found, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}

/// The frame's own counter, or its 1-based position in the input.
fn output_sequence(frame: &PoseFrame, index: usize) -> u64 {
    frame.sequence.unwrap_or(index as u64 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnumbered_frames_use_input_position() {
        assert_eq!(output_sequence(&PoseFrame::default(), 0), 1);
        let numbered = PoseFrame {
            sequence: Some(42),
            ..Default::default()
        };
        assert_eq!(output_sequence(&numbered, 0), 42);
    }

    #[test]
    fn test_frame_lines_carry_session_label() {
        let started_at = Local::now();
        let session = format!("session_{}", started_at.format("%Y%m%d_%H%M%S"));
        let rig = SkeletonRig::humanoid();
        let line = FrameOutput {
            session: &session,
            sequence: 3,
            timestamp: 0.1,
            elapsed_ms: (Local::now() - started_at).num_milliseconds(),
            rig: &rig,
        };

        let value = serde_json::to_value(&line).unwrap();
        assert_eq!(value["session"], session.as_str());
        assert_eq!(value["sequence"], 3);
        assert!(value["elapsed_ms"].as_i64().unwrap() >= 0);

        let header = SessionHeader {
            session: &session,
            started_at: started_at.to_rfc3339(),
            source: "simulation".to_string(),
        };
        let value = serde_json::to_value(&header).unwrap();
        assert!(value["started_at"].as_str().unwrap().starts_with(&started_at.format("%Y-%m-%d").to_string()));
    }
}
