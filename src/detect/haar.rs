//! Haar-cascade face detector backed by OpenCV

use opencv::core::{Mat, Rect, Size, Vector};
use opencv::imgproc;
use opencv::objdetect::{self, CascadeClassifier};
use opencv::prelude::*;
use std::path::Path;

use crate::detect::{Detection, FaceDetector};
use crate::error::DetectorError;
use crate::video::Frame;

pub struct HaarCascadeDetector {
    classifier: CascadeClassifier,
    scale_factor: f64,
    min_neighbors: i32,
    min_size: i32,
}

impl HaarCascadeDetector {
    /// Load a cascade XML file (e.g. `haarcascade_frontalface_default.xml`)
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DetectorError::Unavailable(format!(
                "cascade file not found: {}",
                path.display()
            )));
        }
        let classifier = CascadeClassifier::new(&path.to_string_lossy())
            .map_err(|e| DetectorError::Unavailable(e.to_string()))?;
        if classifier.empty().unwrap_or(true) {
            return Err(DetectorError::Unavailable(format!(
                "failed to load cascade: {}",
                path.display()
            )));
        }
        tracing::info!("Loaded face cascade {}", path.display());

        Ok(Self {
            classifier,
            scale_factor: 1.1,
            min_neighbors: 4,
            min_size: 30,
        })
    }
}

impl FaceDetector for HaarCascadeDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let failed = |e: opencv::Error| DetectorError::Failed(e.to_string());

        // Flat byte view of the frame, reshaped to rows x cols x 3 without copying
        let flat = Mat::from_slice(frame.data()).map_err(failed)?;
        let bgr = flat.reshape(3, frame.height() as i32).map_err(failed)?;

        let mut gray = Mat::default();
        imgproc::cvt_color(
            &bgr,
            &mut gray,
            imgproc::COLOR_BGR2GRAY,
            0,
            opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(failed)?;

        let mut faces = Vector::<Rect>::new();
        self.classifier
            .detect_multi_scale(
                &gray,
                &mut faces,
                self.scale_factor,
                self.min_neighbors,
                objdetect::CASCADE_SCALE_IMAGE,
                Size::new(self.min_size, self.min_size),
                Size::new(0, 0),
            )
            .map_err(failed)?;

        Ok(faces
            .iter()
            .map(|r| Detection {
                x: r.x.max(0) as u32,
                y: r.y.max(0) as u32,
                width: r.width.max(0) as u32,
                height: r.height.max(0) as u32,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "haar-cascade"
    }
}
