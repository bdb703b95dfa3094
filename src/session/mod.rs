//! Vehicle session: owns the control link, video bridge and autonomous behaviours
//!
//! ```text
//!   operator ──► Session ──► CommandChannel ──► control socket ──► vehicle
//!                   │              ▲                                  │
//!                   │              └──── ResponseListener ◄───────────┘
//!                   │
//!                   └──► VideoBridge ──► decoder ──► FramePipeline ──► JPEG
//!                                                        │
//!                                                        └──► go x y z (tracking)
//! ```
//!
//! A session binds its ports exclusively, so only one can exist per host
//! port pair. Teardown happens in `disconnect` (also run on drop).

mod flags;
mod pipeline;

pub use flags::SessionFlags;
pub use pipeline::{FrameAnalysis, FramePipeline, PipelineStats};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{AppConfig, Units};
use crate::control::{PatrolController, PatrolState, StopOutcome, TrackingController};
use crate::detect::FaceDetector;
use crate::error::{CommandError, Result, VideoError};
use crate::network::udp::create_socket;
use crate::network::{
    ChannelStats, CommandChannel, LatestResponse, ListenerStats, Response, ResponseListener, SendOutcome,
};
use crate::protocol::{parse_numeric, Command, Direction, FlipDirection, Query, Rotation};
use crate::video::{FrameReader, FrameSource, SnapshotWriter, VideoBridge, VideoStats};
use crate::worker::{fault_channel, Fault, FaultReceiver, StopFlag};

const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const INGRESS_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const SNAPSHOT_POLLS: u32 = 3;
const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Point-in-time view of the session, suitable for JSON output
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub control_addr: SocketAddr,
    pub drone_addr: SocketAddr,
    pub units: Units,
    pub speed: u32,
    pub link_alive: bool,
    pub tracking_enabled: bool,
    pub detect_enabled: bool,
    pub detector: String,
    pub detector_available: bool,
    pub patrol: PatrolState,
    pub patrolling: bool,
    pub patrol_steps_sent: u64,
    pub snapshot_requested: bool,
    pub channel: ChannelStats,
    pub listener: Option<ListenerStats>,
    pub video: Option<VideoStats>,
    pub pipeline: PipelineStats,
}

/// A connected vehicle
pub struct Session {
    /// Configuration the session was connected with
    config: AppConfig,
    /// Bound control socket address
    control_addr: SocketAddr,
    /// Ends JPEG streams on disconnect
    stop: StopFlag,
    /// Set by the first `disconnect`
    disconnected: AtomicBool,
    /// Terminal conditions reported by background loops
    faults: FaultReceiver,
    /// Single-flight command path to the vehicle
    channel: Arc<CommandChannel>,
    /// Reply reader; taken on disconnect
    listener: Mutex<Option<ResponseListener>>,
    /// Video ingress and decoder; `None` when video is disabled or shut down
    video: Mutex<Option<VideoBridge>>,
    /// Bound video socket address
    video_addr: Option<SocketAddr>,
    /// Decoder output, shared by frame readers
    source: Option<Arc<FrameSource>>,
    /// Autonomous patrol
    patrol: Arc<PatrolController>,
    /// Operator toggles and cruise speed
    flags: Arc<SessionFlags>,
    /// Per-frame detection, tracking and encoding
    pipeline: Arc<FramePipeline>,
}

impl Session {
    /// Bind the link, start the background loops and run the SDK handshake
    pub fn connect(config: AppConfig, detector: Box<dyn FaceDetector>) -> Result<Self> {
        let slice = config.link.receive_slice().min(LISTENER_JOIN_TIMEOUT / 4);
        let socket = create_socket(config.link.control_bind_addr(), slice)?;
        let control_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (fault_tx, faults) = fault_channel();
        let latest = Arc::new(LatestResponse::new());
        let listener = ResponseListener::spawn(socket.clone(), latest.clone(), fault_tx.clone())?;
        let channel = Arc::new(CommandChannel::new(
            socket,
            config.link.drone_addr(),
            latest,
            listener.alive_flag(),
            config.flight.settle_interval(),
        ));

        let video = if config.video.enabled {
            Some(VideoBridge::start(&config.link, &config.video, fault_tx)?)
        } else {
            tracing::info!("Video disabled");
            None
        };
        let video_addr = video.as_ref().map(|v| v.local_addr());
        let source = video.as_ref().map(|v| v.source());

        let snapshots = SnapshotWriter::new(&config.snapshot.directory)?;
        let patrol = Arc::new(PatrolController::new(
            channel.clone(),
            config.patrol.clone(),
            config.flight.units,
        ));
        let flags = Arc::new(SessionFlags::new(config.flight.speed));
        let pipeline = Arc::new(FramePipeline::new(
            detector,
            TrackingController::new(config.tracking.clone()),
            flags.clone(),
            patrol.clone(),
            channel.clone(),
            snapshots,
            config.video.jpeg_quality,
        ));

        tracing::info!(
            "Session bound on {} (vehicle {})",
            control_addr,
            config.link.drone_addr()
        );

        let session = Self {
            config,
            control_addr,
            stop: StopFlag::new(),
            disconnected: AtomicBool::new(false),
            faults,
            channel,
            listener: Mutex::new(Some(listener)),
            video: Mutex::new(video),
            video_addr,
            source,
            patrol,
            flags,
            pipeline,
        };
        session.handshake()?;
        Ok(session)
    }

    fn handshake(&self) -> Result<()> {
        let sequence = [
            Command::Sdk,
            Command::StreamOn,
            Command::Speed(self.config.flight.speed),
        ];
        for (i, command) in sequence.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.config.flight.startup_delay());
            }
            let outcome = self.send_command(command)?;
            if outcome.response().is_none() {
                tracing::warn!(command = %command, "No reply to handshake command");
            }
        }
        Ok(())
    }

    /// Send a raw command string, waiting for the channel
    pub fn send(&self, command: &str) -> Result<SendOutcome> {
        Ok(self.channel.send(command, true)?)
    }

    pub fn send_command(&self, command: &Command) -> Result<SendOutcome> {
        Ok(self.channel.send_command(command, true)?)
    }

    pub fn takeoff(&self) -> Result<SendOutcome> {
        let flight = &self.config.flight;
        match self.battery()? {
            Some(level) if level < flight.battery_critical => {
                tracing::error!(battery = level, "Battery critical, refusing takeoff");
                return Err(CommandError::BatteryCritical(level).into());
            }
            Some(level) if level < flight.battery_low => {
                tracing::warn!(battery = level, "Battery low");
            }
            Some(level) => tracing::info!(battery = level, "Battery level"),
            None => tracing::warn!("Battery level unknown, proceeding with takeoff"),
        }
        self.send_command(&Command::Takeoff)
    }

    pub fn land(&self) -> Result<SendOutcome> {
        self.send_command(&Command::Land)
    }

    /// Move `distance` (session units, default from config) in `direction`
    pub fn move_by(&self, direction: Direction, distance: Option<f64>) -> Result<SendOutcome> {
        let distance = distance.unwrap_or(self.config.flight.default_distance);
        if !distance.is_finite() || distance < 0.0 {
            return Err(CommandError::InvalidArgument(format!(
                "distance must be a non-negative number (got {})",
                distance
            ))
            .into());
        }
        let cm = self.config.flight.units.to_centimeters(distance);
        self.send_command(&Command::Move { direction, cm })
    }

    pub fn up(&self, distance: Option<f64>) -> Result<SendOutcome> {
        self.move_by(Direction::Up, distance)
    }

    pub fn down(&self, distance: Option<f64>) -> Result<SendOutcome> {
        self.move_by(Direction::Down, distance)
    }

    pub fn left(&self, distance: Option<f64>) -> Result<SendOutcome> {
        self.move_by(Direction::Left, distance)
    }

    pub fn right(&self, distance: Option<f64>) -> Result<SendOutcome> {
        self.move_by(Direction::Right, distance)
    }

    pub fn forward(&self, distance: Option<f64>) -> Result<SendOutcome> {
        self.move_by(Direction::Forward, distance)
    }

    pub fn back(&self, distance: Option<f64>) -> Result<SendOutcome> {
        self.move_by(Direction::Back, distance)
    }

    pub fn rotate(&self, rotation: Rotation, degrees: Option<u32>) -> Result<SendOutcome> {
        let degrees = degrees.unwrap_or(self.config.flight.default_degrees);
        self.send_command(&Command::Rotate { rotation, degrees })
    }

    pub fn clockwise(&self, degrees: Option<u32>) -> Result<SendOutcome> {
        self.rotate(Rotation::Clockwise, degrees)
    }

    pub fn counter_clockwise(&self, degrees: Option<u32>) -> Result<SendOutcome> {
        self.rotate(Rotation::CounterClockwise, degrees)
    }

    /// Flip toward `l`, `r`, `f` or `b`. Anything else is rejected unsent.
    pub fn flip(&self, direction: &str) -> Result<SendOutcome> {
        let direction: FlipDirection = direction.parse()?;
        self.send_command(&Command::Flip(direction))
    }

    /// Set the vehicle speed and the cruise speed used by tracking
    pub fn set_speed(&self, speed: u32) -> Result<SendOutcome> {
        let outcome = self.send_command(&Command::Speed(speed))?;
        self.flags.set_speed(speed);
        Ok(outcome)
    }

    /// Send a telemetry query and return the reply observed after it, if any
    pub fn query(&self, query: Query) -> Result<Option<Response>> {
        let outcome = self.send_command(&Command::Query(query))?;
        Ok(outcome.response().cloned())
    }

    /// Battery percentage, if the vehicle answered with a number
    pub fn battery(&self) -> Result<Option<u8>> {
        let response = self.query(Query::Battery)?;
        Ok(response
            .and_then(|r| parse_numeric(&r.payload))
            .and_then(|level| u8::try_from(level).ok()))
    }

    pub fn enable_tracking(&self) {
        self.flags.set_tracking(true);
        tracing::info!("Face tracking enabled");
    }

    pub fn disable_tracking(&self) {
        self.flags.set_tracking(false);
        tracing::info!("Face tracking disabled");
    }

    /// Returns the new tracking state
    pub fn toggle_tracking(&self) -> bool {
        let enabled = self.flags.toggle_tracking();
        tracing::info!("Face tracking {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    /// Turn on face detection. Returns `false` when no usable detector is loaded.
    pub fn enable_detection(&self) -> bool {
        if !self.pipeline.detector_available() {
            tracing::error!("Face detector unavailable, detection not enabled");
            return false;
        }
        self.flags.set_detect(true);
        tracing::info!("Face detection enabled");
        true
    }

    pub fn disable_detection(&self) {
        self.flags.set_detect(false);
        tracing::info!("Face detection disabled");
    }

    pub fn start_patrol(&self) -> bool {
        self.patrol.start()
    }

    pub fn stop_patrol(&self) -> StopOutcome {
        self.patrol.stop()
    }

    /// Ask the frame pipeline to save the next JPEG and wait briefly for it.
    ///
    /// Returns whether a snapshot was written within the wait.
    pub fn request_snapshot(&self) -> bool {
        self.flags.request_snapshot();
        for _ in 0..SNAPSHOT_POLLS {
            if !self.flags.snapshot_requested() {
                return true;
            }
            thread::sleep(SNAPSHOT_POLL_INTERVAL);
        }
        !self.flags.snapshot_requested()
    }

    /// Raw decoded frames
    pub fn frames(&self) -> std::result::Result<FrameReader, VideoError> {
        self.source
            .as_ref()
            .map(|source| source.reader())
            .ok_or(VideoError::PipeUnavailable)
    }

    /// Processed frames as JPEG buffers
    pub fn jpeg_stream(&self) -> std::result::Result<JpegStream, VideoError> {
        Ok(JpegStream {
            frames: self.frames()?,
            pipeline: self.pipeline.clone(),
            stop: self.stop.clone(),
        })
    }

    /// Drain faults reported by background loops since the last call
    pub fn faults(&self) -> Vec<Fault> {
        self.faults.try_iter().collect()
    }

    pub fn is_link_alive(&self) -> bool {
        !self.channel.is_closed() && self.channel.is_listener_alive()
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn video_addr(&self) -> Option<SocketAddr> {
        self.video_addr
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        let patrol = self.patrol.state();
        SessionStatus {
            control_addr: self.control_addr,
            drone_addr: self.channel.target(),
            units: self.config.flight.units,
            speed: self.flags.speed(),
            link_alive: self.is_link_alive(),
            tracking_enabled: self.flags.tracking_enabled(),
            detect_enabled: self.flags.detect_enabled(),
            detector: self.pipeline.detector_name(),
            detector_available: self.pipeline.detector_available(),
            patrol,
            patrolling: patrol == PatrolState::Running,
            patrol_steps_sent: self.patrol.steps_sent(),
            snapshot_requested: self.flags.snapshot_requested(),
            channel: self.channel.stats(),
            listener: self.listener.lock().as_ref().map(|l| l.stats()),
            video: self.video.lock().as_ref().map(|v| v.stats()),
            pipeline: self.pipeline.stats(),
        }
    }

    /// Stop everything. Safe to call more than once.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Disconnecting from {}", self.channel.target());

        self.stop.stop();
        self.channel.close();
        self.patrol.stop();

        if let Some(mut listener) = self.listener.lock().take() {
            if !listener.stop(LISTENER_JOIN_TIMEOUT) {
                tracing::warn!("Response listener did not exit within {:?}", LISTENER_JOIN_TIMEOUT);
            }
        }
        if let Some(mut video) = self.video.lock().take() {
            video.shutdown(INGRESS_JOIN_TIMEOUT);
        }

        tracing::info!("Disconnected");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Lazy sequence of processed JPEG frames.
///
/// Ends when the decoder output closes or the session disconnects. Frames
/// that fail to encode are skipped.
pub struct JpegStream {
    frames: FrameReader,
    pipeline: Arc<FramePipeline>,
    stop: StopFlag,
}

impl Iterator for JpegStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            if self.stop.is_stopped() {
                return None;
            }
            let frame = self.frames.next()?;
            match self.pipeline.process(&frame) {
                Ok(jpeg) => return Some(jpeg),
                Err(e) => tracing::error!(frame = frame.index, "{}", e),
            }
        }
    }
}
