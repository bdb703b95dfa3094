//! Face detection interface
//!
//! The detector is a black box: it takes a frame and returns zero or more
//! bounding boxes in frame pixel coordinates.

#[cfg(feature = "opencv")]
pub mod haar;

use serde::Serialize;

use crate::error::DetectorError;
use crate::video::Frame;

/// Bounding box of one detected face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Detection {
    /// Integer center (truncating half sizes)
    pub fn center(&self) -> (i64, i64) {
        (
            self.x as i64 + self.width as i64 / 2,
            self.y as i64 + self.height as i64 / 2,
        )
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Anything that can find faces in a frame
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;

    /// Whether the detector loaded and can be enabled
    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

/// Placeholder used when no detector model is configured
#[derive(Debug, Default)]
pub struct NoDetector;

impl FaceDetector for NoDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Err(DetectorError::Unavailable("no face detector configured".into()))
    }

    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_geometry() {
        let d = Detection { x: 10, y: 20, width: 31, height: 40 };
        assert_eq!(d.center(), (25, 40));
        assert_eq!(d.area(), 1240);
    }

    #[test]
    fn test_no_detector() {
        let mut detector = NoDetector;
        assert!(!detector.is_available());
        assert!(detector.detect(&Frame::filled(2, 2, crate::video::Bgr([0, 0, 0]))).is_err());
    }
}
