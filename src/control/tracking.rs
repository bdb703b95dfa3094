//! Proportional face-tracking controller
//!
//! Vehicle frame for `go x y z speed`: x forward, y left, z up (cm).
//! Image frame: origin top-left, y grows downward. A face left of center
//! therefore yields positive dx and a lateral move to the left; a face above
//! center yields positive dy and a climb.

use serde::Serialize;
use std::time::Instant;

use crate::config::TrackingConfig;
use crate::detect::Detection;
use crate::protocol::Command;

/// 3-axis correction plus speed cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub speed: u32,
}

impl Correction {
    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0 && self.z == 0
    }

    pub fn to_command(&self) -> Command {
        Command::Go {
            x: self.x,
            y: self.y,
            z: self.z,
            speed: self.speed,
        }
    }
}

/// Detection geometry relative to the frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Offset {
    pub center: (i64, i64),
    /// frame center minus face center, in pixels
    pub dx: f64,
    pub dy: f64,
    /// face area over frame area
    pub area_fraction: f64,
}

impl Offset {
    pub fn measure(detection: &Detection, frame_width: u32, frame_height: u32) -> Self {
        let center = detection.center();
        let frame_area = (frame_width as f64 * frame_height as f64).max(1.0);
        Self {
            center,
            dx: frame_width as f64 / 2.0 - center.0 as f64,
            dy: frame_height as f64 / 2.0 - center.1 as f64,
            area_fraction: detection.area() as f64 / frame_area,
        }
    }
}

/// Converts detections into rate-limited corrections
#[derive(Debug)]
pub struct TrackingController {
    config: TrackingConfig,
    last_command_time: Option<Instant>,
}

impl TrackingController {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            last_command_time: None,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn last_command_time(&self) -> Option<Instant> {
        self.last_command_time
    }

    /// Control law, independent per axis. Magnitudes truncate toward zero.
    pub fn correction(&self, offset: &Offset, cruise_speed: u32) -> Correction {
        let c = &self.config;
        let mut correction = Correction {
            x: 0,
            y: 0,
            z: 0,
            speed: cruise_speed.min(c.max_speed),
        };

        if offset.dx > c.horizontal_threshold {
            correction.y = ((offset.dx * c.horizontal_gain) as i32).min(c.max_lateral);
        } else if offset.dx < -c.horizontal_threshold {
            correction.y = ((offset.dx * c.horizontal_gain) as i32).max(-c.max_lateral);
        }

        let climb = ((offset.dy.abs() * c.vertical_gain) as i32).min(c.max_vertical);
        if offset.dy > c.vertical_threshold {
            correction.z = climb;
        } else if offset.dy < -c.vertical_threshold {
            correction.z = -climb;
        }

        if offset.area_fraction > c.retreat_area {
            correction.x = -c.distance_step;
        } else if offset.area_fraction < c.approach_area {
            correction.x = c.distance_step;
        }

        correction
    }

    /// Decide whether this detection produces a command at `now`.
    ///
    /// Emits only when tracking is enabled, some axis is non-zero and more than
    /// the throttle interval has passed since the last emitted command.
    /// Skipped frames are not queued.
    pub fn evaluate(
        &mut self,
        offset: &Offset,
        cruise_speed: u32,
        tracking_enabled: bool,
        now: Instant,
    ) -> Option<Correction> {
        if !tracking_enabled {
            return None;
        }
        let correction = self.correction(offset, cruise_speed);
        if correction.is_zero() {
            return None;
        }
        if let Some(last) = self.last_command_time {
            if now.saturating_duration_since(last) <= self.config.throttle() {
                return None;
            }
        }
        self.last_command_time = Some(now);
        Some(correction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const W: u32 = 320;
    const H: u32 = 240;

    fn controller() -> TrackingController {
        TrackingController::new(TrackingConfig::default())
    }

    /// A box of `size`x`size` centered at (cx, cy)
    fn face_at(cx: u32, cy: u32, size: u32) -> Offset {
        let detection = Detection {
            x: cx - size / 2,
            y: cy - size / 2,
            width: size,
            height: size,
        };
        Offset::measure(&detection, W, H)
    }

    #[test]
    fn test_dead_zone_issues_nothing() {
        // 100x100 on 320x240 is ~13% of the frame: between approach and retreat
        let offset = face_at(170, 130, 100);
        let mut tracker = controller();

        assert!(tracker.correction(&offset, 10).is_zero());
        assert!(tracker.evaluate(&offset, 10, true, Instant::now()).is_none());
        assert!(tracker.last_command_time().is_none());
    }

    #[test]
    fn test_face_left_moves_left() {
        // dx = 160 - 60 = 100 → trunc(50) clamped to 40
        let correction = controller().correction(&face_at(60, 120, 100), 10);
        assert_eq!(correction.y, 40);
        assert_eq!(correction.z, 0);
    }

    #[test]
    fn test_face_right_moves_right() {
        // dx = 160 - 250 = -90 → -45 clamped to -40
        let correction = controller().correction(&face_at(250, 120, 100), 10);
        assert_eq!(correction.y, -40);

        // dx = 160 - 210 = -50 → -25
        let correction = controller().correction(&face_at(210, 120, 100), 10);
        assert_eq!(correction.y, -25);
    }

    #[test]
    fn test_vertical_correction() {
        // dy = 120 - 70 = 50 → trunc(20) up
        let correction = controller().correction(&face_at(160, 70, 100), 10);
        assert_eq!(correction.z, 20);

        // dy = 120 - 200 = -80 → -min(32, 30)
        let correction = controller().correction(&face_at(160, 200, 60), 10);
        assert_eq!(correction.z, -30);
    }

    #[test]
    fn test_distance_correction() {
        // 200x200 = 52% → retreat
        assert_eq!(controller().correction(&face_at(160, 120, 200), 10).x, -15);
        // 40x40 = 2% → approach
        assert_eq!(controller().correction(&face_at(160, 120, 40), 10).x, 15);
    }

    #[test]
    fn test_speed_cap() {
        assert_eq!(controller().correction(&face_at(160, 120, 40), 80).speed, 50);
        assert_eq!(controller().correction(&face_at(160, 120, 40), 20).speed, 20);
    }

    #[test]
    fn test_throttle_allows_one_per_interval() {
        let mut tracker = controller();
        let offset = face_at(60, 120, 100);
        let t0 = Instant::now();

        assert!(tracker.evaluate(&offset, 10, true, t0).is_some());
        assert!(tracker.evaluate(&offset, 10, true, t0 + Duration::from_millis(100)).is_none());
        assert!(tracker.evaluate(&offset, 10, true, t0 + Duration::from_millis(300)).is_none());
        assert!(tracker.evaluate(&offset, 10, true, t0 + Duration::from_millis(301)).is_some());
    }

    #[test]
    fn test_tracking_disabled_never_emits() {
        let mut tracker = controller();
        assert!(tracker
            .evaluate(&face_at(60, 120, 100), 10, false, Instant::now())
            .is_none());
        assert!(tracker.last_command_time().is_none());
    }

    #[test]
    fn test_command_format() {
        let correction = controller().correction(&face_at(60, 70, 40), 10);
        assert_eq!(correction.to_command().to_string(), "go 15 40 20 10");
    }
}
