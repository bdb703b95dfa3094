//! Application configuration
//!
//! Every section falls back to the values the vehicle ships with, so an empty
//! (or missing) config file yields a working setup against a stock drone.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub flight: FlightConfig,
    pub video: VideoConfig,
    pub tracking: TrackingConfig,
    pub patrol: PatrolConfig,
    pub snapshot: SnapshotConfig,
}

impl AppConfig {
    /// Parse a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the per-user config directory, or fall back to defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable config: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Write the config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `<config dir>/config.toml` for this application
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "dronelink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Unit system for operator-supplied distances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Distances in metres
    #[default]
    Metric,
    /// Distances in feet
    Imperial,
}

impl Units {
    /// Convert a distance in this unit system to whole centimetres
    pub fn to_centimeters(self, distance: f64) -> i32 {
        let cm = match self {
            Units::Imperial => distance * 30.48,
            Units::Metric => distance * 100.0,
        };
        cm.round_ties_even() as i32
    }
}

/// UDP link addresses and socket timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub host_ip: IpAddr,
    pub control_port: u16,
    pub video_port: u16,
    pub drone_ip: IpAddr,
    pub drone_port: u16,
    /// Control socket read timeout. The listener notices a stop request
    /// within one slice, so keep it well under the teardown join bound.
    pub receive_slice_ms: u64,
    /// Video socket receive timeout
    pub video_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_port: DEFAULT_CONTROL_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            drone_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 10, 1)),
            drone_port: DEFAULT_CONTROL_PORT,
            receive_slice_ms: 100,
            video_timeout_ms: 500,
        }
    }
}

impl LinkConfig {
    pub fn control_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host_ip, self.control_port)
    }

    pub fn video_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host_ip, self.video_port)
    }

    pub fn drone_addr(&self) -> SocketAddr {
        SocketAddr::new(self.drone_ip, self.drone_port)
    }

    pub fn receive_slice(&self) -> Duration {
        Duration::from_millis(self.receive_slice_ms)
    }

    pub fn video_timeout(&self) -> Duration {
        Duration::from_millis(self.video_timeout_ms)
    }
}

/// Flight parameters and command pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    pub units: Units,
    /// Cruising speed in cm/s
    pub speed: u32,
    /// Default move distance in `units`
    pub default_distance: f64,
    /// Default rotation in degrees
    pub default_degrees: u32,
    /// Delay after a send before the latest response is inspected
    pub settle_ms: u64,
    pub battery_low: u8,
    pub battery_critical: u8,
    /// Pause between the handshake commands sent on connect
    pub startup_delay_ms: u64,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            units: Units::Metric,
            speed: DEFAULT_SPEED,
            default_distance: DEFAULT_DISTANCE,
            default_degrees: DEFAULT_DEGREES,
            settle_ms: 1500,
            battery_low: 20,
            battery_critical: 10,
            startup_delay_ms: 1000,
        }
    }
}

impl FlightConfig {
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

/// External decoder and frame geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Spawn the decoder and ingress thread on connect
    pub enabled: bool,
    pub decoder_program: String,
    /// Arguments; `{width}` and `{height}` are substituted
    pub decoder_args: Vec<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decoder_program: "ffmpeg".to_string(),
            decoder_args: [
                "-hwaccel", "auto", "-i", "pipe:0", "-pix_fmt", "bgr24", "-s",
                "{width}x{height}", "-f", "rawvideo", "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            frame_width: FRAME_WIDTH,
            frame_height: FRAME_HEIGHT,
            jpeg_quality: 80,
        }
    }
}

impl VideoConfig {
    /// Decoder arguments with frame geometry substituted
    pub fn resolved_args(&self) -> Vec<String> {
        self.decoder_args
            .iter()
            .map(|arg| {
                arg.replace("{width}", &self.frame_width.to_string())
                    .replace("{height}", &self.frame_height.to_string())
            })
            .collect()
    }

    /// Bytes per decoded frame
    pub fn frame_size(&self) -> usize {
        self.frame_width as usize * self.frame_height as usize * 3
    }
}

/// Proportional tracking gains and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Horizontal dead zone in pixels
    pub horizontal_threshold: f64,
    /// Vertical dead zone in pixels
    pub vertical_threshold: f64,
    pub horizontal_gain: f64,
    pub vertical_gain: f64,
    pub max_lateral: i32,
    pub max_vertical: i32,
    /// Retreat when the face covers more than this fraction of the frame
    pub retreat_area: f64,
    /// Approach when the face covers less than this fraction of the frame
    pub approach_area: f64,
    /// Forward/back magnitude in cm
    pub distance_step: i32,
    pub max_speed: u32,
    /// Minimum gap between correction commands
    pub throttle_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            horizontal_threshold: 40.0,
            vertical_threshold: 30.0,
            horizontal_gain: 0.5,
            vertical_gain: 0.4,
            max_lateral: 40,
            max_vertical: 30,
            retreat_area: 0.3,
            approach_area: 0.1,
            distance_step: 15,
            max_speed: 50,
            throttle_ms: 300,
        }
    }
}

impl TrackingConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

/// Patrol cycle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    /// Climb/descend distance per step, in flight units
    pub step_distance: f64,
    pub step_degrees: u32,
    /// Wait between steps
    pub dwell_ms: u64,
    /// Poll interval while stopping
    pub poll_ms: u64,
    /// Give up waiting for the patrol thread after this long
    pub stop_timeout_ms: u64,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            step_distance: DEFAULT_DISTANCE,
            step_degrees: DEFAULT_DEGREES,
            dwell_ms: 5000,
            poll_ms: 300,
            stop_timeout_ms: 90_000,
        }
    }
}

impl PatrolConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Snapshot output location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub directory: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("snapshots"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(Units::Imperial.to_centimeters(0.5), 15);
        assert_eq!(Units::Metric.to_centimeters(0.3), 30);
        assert_eq!(Units::Metric.to_centimeters(1.234), 123);
        assert_eq!(Units::Imperial.to_centimeters(1.0), 30);
    }

    #[test]
    fn test_unit_conversion_ties_round_to_even() {
        assert_eq!(Units::Metric.to_centimeters(0.125), 12);
        assert_eq!(Units::Metric.to_centimeters(0.625), 62);
        assert_eq!(Units::Metric.to_centimeters(0.135), 14);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.link.control_port, 8889);
        assert_eq!(config.link.video_port, 11111);
        assert_eq!(config.flight.units, Units::Metric);
        assert_eq!(config.video.frame_size(), 320 * 240 * 3);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [flight]
            units = "imperial"
            speed = 30

            [tracking]
            throttle_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.flight.units, Units::Imperial);
        assert_eq!(config.flight.speed, 30);
        assert_eq!(config.flight.settle_ms, 1500);
        assert_eq!(config.tracking.throttle(), Duration::from_millis(500));
    }

    #[test]
    fn test_decoder_args_substitution() {
        let video = VideoConfig::default();
        let args = video.resolved_args();
        assert!(args.contains(&"320x240".to_string()));
        assert_eq!(args.first().map(String::as_str), Some("-hwaccel"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("dronelink-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = AppConfig::default();
        config.flight.speed = 42;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.flight.speed, 42);
        let _ = std::fs::remove_dir_all(dir);
    }

    proptest! {
        #[test]
        fn prop_metric_is_rounded_hundredths(distance in 0.0f64..50.0) {
            let cm = Units::Metric.to_centimeters(distance);
            prop_assert!((cm as f64 - distance * 100.0).abs() <= 0.5);
        }

        #[test]
        fn prop_imperial_is_rounded_feet(distance in 0.0f64..50.0) {
            let cm = Units::Imperial.to_centimeters(distance);
            prop_assert!((cm as f64 - distance * 30.48).abs() <= 0.5);
        }
    }
}
