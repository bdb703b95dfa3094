//! Text command protocol spoken with the vehicle
//!
//! Commands are single UTF-8 datagrams (`"up 30"`, `"flip l"`, `"battery?"`).
//! Replies arrive asynchronously on the same port and are usually `ok`,
//! `error` or a bare number.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::CommandError;

/// Translation directions accepted by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::Back => "back",
        }
    }
}

impl FromStr for Direction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "forward" => Ok(Direction::Forward),
            "back" => Ok(Direction::Back),
            other => Err(CommandError::InvalidArgument(format!(
                "unknown direction '{}'",
                other
            ))),
        }
    }
}

/// Yaw rotation sense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

/// Flip directions: left, right, forward, back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    pub fn code(&self) -> char {
        match self {
            FlipDirection::Left => 'l',
            FlipDirection::Right => 'r',
            FlipDirection::Forward => 'f',
            FlipDirection::Back => 'b',
        }
    }
}

impl FromStr for FlipDirection {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l" => Ok(FlipDirection::Left),
            "r" => Ok(FlipDirection::Right),
            "f" => Ok(FlipDirection::Forward),
            "b" => Ok(FlipDirection::Back),
            other => Err(CommandError::InvalidArgument(format!(
                "flip direction must be one of l, r, f, b (got '{}')",
                other
            ))),
        }
    }
}

/// Read-only telemetry queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    Battery,
    Speed,
    FlightTime,
    Height,
    Temperature,
    Attitude,
}

impl Query {
    pub fn as_str(&self) -> &'static str {
        match self {
            Query::Battery => "battery?",
            Query::Speed => "speed?",
            Query::FlightTime => "time?",
            Query::Height => "height?",
            Query::Temperature => "temp?",
            Query::Attitude => "attitude?",
        }
    }
}

/// Every command the crate emits
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Enter SDK mode
    Sdk,
    StreamOn,
    StreamOff,
    Takeoff,
    Land,
    Move { direction: Direction, cm: i32 },
    Rotate { rotation: Rotation, degrees: u32 },
    Flip(FlipDirection),
    Speed(u32),
    /// Relative 3-axis move: x forward, y left, z up (cm) at `speed` cm/s
    Go { x: i32, y: i32, z: i32, speed: u32 },
    Query(Query),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Sdk => write!(f, "command"),
            Command::StreamOn => write!(f, "streamon"),
            Command::StreamOff => write!(f, "streamoff"),
            Command::Takeoff => write!(f, "takeoff"),
            Command::Land => write!(f, "land"),
            Command::Move { direction, cm } => write!(f, "{} {}", direction.as_str(), cm),
            Command::Rotate { rotation: Rotation::Clockwise, degrees } => write!(f, "cw {}", degrees),
            Command::Rotate { rotation: Rotation::CounterClockwise, degrees } => {
                write!(f, "ccw {}", degrees)
            }
            Command::Flip(direction) => write!(f, "flip {}", direction.code()),
            Command::Speed(speed) => write!(f, "speed {}", speed),
            Command::Go { x, y, z, speed } => write!(f, "go {} {} {} {}", x, y, z, speed),
            Command::Query(query) => write!(f, "{}", query.as_str()),
        }
    }
}

/// How a response payload was decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseText {
    Utf8(String),
    /// Not valid UTF-8 but printable as Latin-1
    Latin1(String),
    /// Neither; kept as bytes and logged as hex
    Raw,
}

impl ResponseText {
    pub fn encoding(&self) -> &'static str {
        match self {
            ResponseText::Utf8(_) => "utf-8",
            ResponseText::Latin1(_) => "latin-1",
            ResponseText::Raw => "raw",
        }
    }
}

/// Decode a response payload: UTF-8, then Latin-1, then raw
pub fn decode_response(payload: &[u8]) -> ResponseText {
    if let Ok(text) = std::str::from_utf8(payload) {
        return ResponseText::Utf8(text.trim().to_string());
    }

    let printable = payload
        .iter()
        .all(|&b| matches!(b, b'\t' | b'\n' | b'\r') || (0x20..0x7f).contains(&b) || b >= 0xa0);
    if printable {
        let text: String = payload.iter().map(|&b| b as char).collect();
        return ResponseText::Latin1(text.trim().to_string());
    }

    ResponseText::Raw
}

/// Lowercase hex rendering for undecodable payloads
pub fn to_hex(payload: &[u8]) -> String {
    payload.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse a bare numeric reply such as a battery percentage
pub fn parse_numeric(payload: &Bytes) -> Option<i64> {
    match decode_response(payload) {
        ResponseText::Utf8(text) | ResponseText::Latin1(text) => text.parse().ok(),
        ResponseText::Raw => None,
    }
}
