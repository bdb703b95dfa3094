//! Per-frame processing: detection, tracking corrections, annotation, JPEG, snapshots
//!
//! Runs inline on whichever thread drives the frame stream. Nothing here is
//! fatal to the stream: detector and snapshot failures are logged and the
//! frame still goes out.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::control::{Correction, Offset, PatrolController, TrackingController};
use crate::detect::{Detection, FaceDetector};
use crate::error::VideoError;
use crate::network::CommandChannel;
use crate::session::flags::SessionFlags;
use crate::video::{Bgr, Frame, SnapshotWriter};

const BOX_THICKNESS: u32 = 2;
const CROSSHAIR_ARM: i64 = 10;

/// What the pipeline decided for one frame
#[derive(Debug, Default)]
pub struct FrameAnalysis {
    /// Annotated private copy; `None` means the input passes through unchanged
    pub annotated: Option<Frame>,
    pub detection: Option<Detection>,
    pub offset: Option<Offset>,
    /// Correction emitted for this frame, if any
    pub correction: Option<Correction>,
}

/// Pipeline statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub detections: u64,
    pub detector_errors: u64,
    pub corrections_sent: u64,
    pub snapshots_saved: u64,
}

#[derive(Default)]
struct Counters {
    frames_processed: AtomicU64,
    detections: AtomicU64,
    detector_errors: AtomicU64,
    corrections_sent: AtomicU64,
    snapshots_saved: AtomicU64,
}

pub struct FramePipeline {
    /// Face detector; `NoDetector` when none could be loaded
    detector: Mutex<Box<dyn FaceDetector>>,
    /// Control law plus the correction throttle
    tracker: Mutex<TrackingController>,
    /// Operator toggles shared with the session
    flags: Arc<SessionFlags>,
    /// Stopped as soon as detection sees a frame
    patrol: Arc<PatrolController>,
    /// Where tracking corrections go, never blocking the stream
    channel: Arc<CommandChannel>,
    /// Destination for requested snapshots
    snapshots: SnapshotWriter,
    /// JPEG quality (1-100)
    jpeg_quality: u8,
    /// Statistics
    counters: Counters,
}

impl FramePipeline {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        tracker: TrackingController,
        flags: Arc<SessionFlags>,
        patrol: Arc<PatrolController>,
        channel: Arc<CommandChannel>,
        snapshots: SnapshotWriter,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            detector: Mutex::new(detector),
            tracker: Mutex::new(tracker),
            flags,
            patrol,
            channel,
            snapshots,
            jpeg_quality,
            counters: Counters::default(),
        }
    }

    pub fn detector_available(&self) -> bool {
        self.detector.lock().is_available()
    }

    pub fn detector_name(&self) -> String {
        self.detector.lock().name().to_string()
    }

    /// Run detection and tracking for one frame without encoding it
    pub fn analyze(&self, frame: &Frame) -> FrameAnalysis {
        if !self.flags.detect_enabled() {
            return FrameAnalysis::default();
        }

        if self.patrol.is_running() {
            tracing::info!("Detection active, stopping patrol");
            self.patrol.stop();
        }

        let detections = match self.detector.lock().detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                self.counters.detector_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Face detection error: {}", e);
                return FrameAnalysis::default();
            }
        };

        let Some(detection) = detections.first().copied() else {
            return FrameAnalysis::default();
        };
        self.counters.detections.fetch_add(1, Ordering::Relaxed);

        let offset = Offset::measure(&detection, frame.width(), frame.height());
        let correction = self.tracker.lock().evaluate(
            &offset,
            self.flags.speed(),
            self.flags.tracking_enabled(),
            Instant::now(),
        );

        if let Some(c) = &correction {
            match self.channel.dispatch(c.to_command().to_string(), false) {
                Ok(_) => {
                    self.counters.corrections_sent.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        "Face tracking: center=({},{}), diff=({},{}), face%={:.3}, move=({},{},{})",
                        offset.center.0,
                        offset.center.1,
                        offset.dx,
                        offset.dy,
                        offset.area_fraction,
                        c.x,
                        c.y,
                        c.z
                    );
                }
                Err(e) => tracing::warn!("Failed to dispatch tracking command: {}", e),
            }
        }

        let mut annotated = frame.clone();
        annotated.draw_box(&detection, Bgr::GREEN, BOX_THICKNESS);
        let (cx, cy) = frame.center();
        annotated.draw_crosshair(cx as i64, cy as i64, CROSSHAIR_ARM, Bgr::CYAN);

        FrameAnalysis {
            annotated: Some(annotated),
            detection: Some(detection),
            offset: Some(offset),
            correction,
        }
    }

    /// Analyze, encode to JPEG and honour any pending snapshot request
    pub fn process(&self, frame: &Frame) -> Result<Bytes, VideoError> {
        self.counters.frames_processed.fetch_add(1, Ordering::Relaxed);

        let analysis = self.analyze(frame);
        let output = analysis.annotated.as_ref().unwrap_or(frame);
        let jpeg = output.to_jpeg(self.jpeg_quality)?;

        if self.flags.snapshot_requested() {
            match self.snapshots.write(&jpeg) {
                Ok(_) => {
                    self.counters.snapshots_saved.fetch_add(1, Ordering::Relaxed);
                    self.flags.clear_snapshot();
                }
                Err(e) => tracing::error!("{}", e),
            }
        }

        Ok(jpeg)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_processed: self.counters.frames_processed.load(Ordering::Relaxed),
            detections: self.counters.detections.load(Ordering::Relaxed),
            detector_errors: self.counters.detector_errors.load(Ordering::Relaxed),
            corrections_sent: self.counters.corrections_sent.load(Ordering::Relaxed),
            snapshots_saved: self.counters.snapshots_saved.load(Ordering::Relaxed),
        }
    }
}
