//! Drone Operator Console
//!
//! Connects to the vehicle, runs the processed video stream in the
//! background and executes operator commands read from stdin.

use anyhow::{anyhow, bail, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dronelink::{
    config::AppConfig,
    detect::{FaceDetector, NoDetector},
    network::SendOutcome,
    protocol::{to_hex, Direction, Query, Rotation},
    Session,
};

/// Log stream throughput every this many frames
const STATS_EVERY_FRAMES: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting drone operator console");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::load_or_default(),
    };
    tracing::info!("Vehicle at {}", config.link.drone_addr());

    let detector = load_detector();
    let session = Arc::new(tokio::task::spawn_blocking(move || Session::connect(config, detector)).await??);

    match session.jpeg_stream() {
        Ok(stream) => {
            tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let mut frames: u64 = 0;
                let mut bytes: u64 = 0;
                for jpeg in stream {
                    frames += 1;
                    bytes += jpeg.len() as u64;
                    if frames % STATS_EVERY_FRAMES == 0 {
                        let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                        tracing::info!(
                            "Video: {} frames, {:.1} fps, {:.1} KB/s",
                            frames,
                            frames as f64 / elapsed,
                            bytes as f64 / 1024.0 / elapsed
                        );
                    }
                }
                tracing::info!("Video stream ended after {} frames", frames);
            });
        }
        Err(e) => tracing::warn!("No video stream: {}", e),
    }

    println!("Type 'help' for commands, Ctrl+C to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    break;
                }
                let operator = match OperatorCommand::from_str(&line) {
                    Ok(operator) => operator,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                let session = session.clone();
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = execute(&session, operator) {
                        tracing::error!("{}", e);
                    }
                });
            }
        }
    }

    for fault in session.faults() {
        tracing::warn!("Fault during session: {}", fault);
    }

    let closing = session.clone();
    tokio::task::spawn_blocking(move || closing.disconnect()).await?;
    Ok(())
}

#[cfg(feature = "opencv")]
fn load_detector() -> Box<dyn FaceDetector> {
    let path = std::env::var("DRONELINK_CASCADE")
        .unwrap_or_else(|_| "haarcascade_frontalface_default.xml".into());
    match dronelink::detect::haar::HaarCascadeDetector::load(&path) {
        Ok(detector) => Box::new(detector),
        Err(e) => {
            tracing::warn!("Face detection unavailable: {}", e);
            Box::new(NoDetector)
        }
    }
}

#[cfg(not(feature = "opencv"))]
fn load_detector() -> Box<dyn FaceDetector> {
    tracing::info!("Built without a face detector; detection commands will be refused");
    Box::new(NoDetector)
}

/// One line of operator input
#[derive(Debug, Clone, PartialEq)]
enum OperatorCommand {
    Help,
    Takeoff,
    Land,
    Move(Direction, Option<f64>),
    Rotate(Rotation, Option<u32>),
    Flip(String),
    Speed(u32),
    Patrol,
    StopPatrol,
    StartDetection,
    StopDetection,
    EnableTracking,
    DisableTracking,
    ToggleTracking,
    Snapshot,
    Query(Query),
    Status,
    Raw(String),
}

impl FromStr for OperatorCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or_else(|| anyhow!("empty command"))?;
        let arg = parts.next();

        let command = match name {
            "help" => OperatorCommand::Help,
            "takeoff" => OperatorCommand::Takeoff,
            "land" => OperatorCommand::Land,
            "up" | "down" | "left" | "right" | "forward" | "back" => {
                OperatorCommand::Move(name.parse()?, arg.map(str::parse).transpose()?)
            }
            "clockwise" | "cw" => OperatorCommand::Rotate(Rotation::Clockwise, arg.map(str::parse).transpose()?),
            "counterClockwise" | "ccw" => {
                OperatorCommand::Rotate(Rotation::CounterClockwise, arg.map(str::parse).transpose()?)
            }
            "flipFront" => OperatorCommand::Flip("f".into()),
            "flipBack" => OperatorCommand::Flip("b".into()),
            "flipLeft" => OperatorCommand::Flip("l".into()),
            "flipRight" => OperatorCommand::Flip("r".into()),
            "flip" => OperatorCommand::Flip(arg.ok_or_else(|| anyhow!("usage: flip <l|r|f|b>"))?.into()),
            "speed" => OperatorCommand::Speed(arg.ok_or_else(|| anyhow!("usage: speed <cm/s>"))?.parse()?),
            "patrol" => OperatorCommand::Patrol,
            "stopPatrol" => OperatorCommand::StopPatrol,
            "faceDetectAndTrack" => OperatorCommand::StartDetection,
            "stopFaceDetectAndTrack" => OperatorCommand::StopDetection,
            "enableFaceTracking" => OperatorCommand::EnableTracking,
            "disableFaceTracking" => OperatorCommand::DisableTracking,
            "toggleFaceTracking" => OperatorCommand::ToggleTracking,
            "snapshot" => OperatorCommand::Snapshot,
            "battery" => OperatorCommand::Query(Query::Battery),
            "query" => OperatorCommand::Query(parse_query(
                arg.ok_or_else(|| anyhow!("usage: query <battery|speed|time|height|temp|attitude>"))?,
            )?),
            "status" => OperatorCommand::Status,
            "send" => {
                let raw = line.trim_start()["send".len()..].trim();
                if raw.is_empty() {
                    bail!("usage: send <raw command>");
                }
                OperatorCommand::Raw(raw.to_string())
            }
            other => bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(command)
    }
}

fn parse_query(name: &str) -> Result<Query> {
    Ok(match name {
        "battery" => Query::Battery,
        "speed" => Query::Speed,
        "time" => Query::FlightTime,
        "height" => Query::Height,
        "temp" => Query::Temperature,
        "attitude" => Query::Attitude,
        other => bail!("unknown query '{}'", other),
    })
}

fn execute(session: &Session, command: OperatorCommand) -> Result<()> {
    match command {
        OperatorCommand::Help => print_help(),
        OperatorCommand::Takeoff => report(session.takeoff()?),
        OperatorCommand::Land => report(session.land()?),
        OperatorCommand::Move(direction, distance) => report(session.move_by(direction, distance)?),
        OperatorCommand::Rotate(rotation, degrees) => report(session.rotate(rotation, degrees)?),
        OperatorCommand::Flip(direction) => report(session.flip(&direction)?),
        OperatorCommand::Speed(speed) => report(session.set_speed(speed)?),
        OperatorCommand::Patrol => {
            if !session.start_patrol() {
                println!("patrol already running");
            }
        }
        OperatorCommand::StopPatrol => println!("patrol stop: {:?}", session.stop_patrol()),
        OperatorCommand::StartDetection => {
            if !session.enable_detection() {
                println!("face detection unavailable");
            }
        }
        OperatorCommand::StopDetection => session.disable_detection(),
        OperatorCommand::EnableTracking => session.enable_tracking(),
        OperatorCommand::DisableTracking => session.disable_tracking(),
        OperatorCommand::ToggleTracking => {
            let enabled = session.toggle_tracking();
            println!("face tracking {}", if enabled { "on" } else { "off" });
        }
        OperatorCommand::Snapshot => {
            if session.request_snapshot() {
                println!("snapshot saved");
            } else {
                println!("snapshot not taken (is video running?)");
            }
        }
        OperatorCommand::Query(query) => match session.query(query)? {
            Some(response) => match response.as_text() {
                Some(text) => println!("{}: {}", query.as_str(), text),
                None => println!("{}: {}", query.as_str(), to_hex(&response.payload)),
            },
            None => println!("{}: no reply", query.as_str()),
        },
        OperatorCommand::Status => println!("{}", serde_json::to_string_pretty(&session.status())?),
        OperatorCommand::Raw(raw) => report(session.send(&raw)?),
    }
    Ok(())
}

fn report(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Dropped => println!("dropped (channel busy)"),
        SendOutcome::Sent(None) => println!("sent, no reply"),
        SendOutcome::Sent(Some(response)) => match response.as_text() {
            Some(text) => println!("{}", text),
            None => println!("raw reply {}", to_hex(&response.payload)),
        },
    }
}

fn print_help() {
    println!("\n=== Operator Commands ===");
    println!("  takeoff | land");
    println!("  up|down|left|right|forward|back [distance]");
    println!("  clockwise|counterClockwise [degrees]");
    println!("  flipFront|flipBack|flipLeft|flipRight | flip <l|r|f|b>");
    println!("  speed <cm/s>");
    println!("  patrol | stopPatrol");
    println!("  faceDetectAndTrack | stopFaceDetectAndTrack");
    println!("  enableFaceTracking | disableFaceTracking | toggleFaceTracking");
    println!("  snapshot | battery | query <battery|speed|time|height|temp|attitude>");
    println!("  status | send <raw command> | quit");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moves_and_rotations() {
        assert_eq!(
            "up 0.5".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Move(Direction::Up, Some(0.5))
        );
        assert_eq!(
            "back".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Move(Direction::Back, None)
        );
        assert_eq!(
            "counterClockwise 90".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Rotate(Rotation::CounterClockwise, Some(90))
        );
    }

    #[test]
    fn test_parse_flip_aliases() {
        assert_eq!(
            "flipLeft".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Flip("l".into())
        );
        // Validated later by the session, not by the parser
        assert_eq!(
            "flip x".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Flip("x".into())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("hover".parse::<OperatorCommand>().is_err());
        assert!("speed fast".parse::<OperatorCommand>().is_err());
        assert!("up far".parse::<OperatorCommand>().is_err());
        assert!("send".parse::<OperatorCommand>().is_err());
    }

    #[test]
    fn test_parse_raw_and_queries() {
        assert_eq!(
            "send go 10 0 0 20".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Raw("go 10 0 0 20".into())
        );
        assert_eq!(
            "query temp".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Query(Query::Temperature)
        );
    }
}
