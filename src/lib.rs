//! # dronelink
//!
//! Control link for Tello-class drones: text commands over UDP, live video
//! through an external decoder, and closed-loop face tracking.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                                 HOST                                        │
//! │                                                                             │
//! │  ┌──────────────┐     ┌──────────────────────────────────────────────┐     │
//! │  │   Operator   │────►│              Session (session)               │     │
//! │  │  (dronectl)  │     │  flags: tracking / detect / snapshot / speed │     │
//! │  └──────────────┘     └──────┬───────────────┬───────────────┬───────┘     │
//! │                              │               │               │             │
//! │                              ▼               ▼               ▼             │
//! │                    ┌──────────────┐  ┌──────────────┐  ┌──────────────┐    │
//! │                    │    Patrol    │  │   Command    │  │    Frame     │    │
//! │                    │  Controller  │─►│   Channel    │◄─│   Pipeline   │    │
//! │                    │ (PatrolLock) │  │(CommandLock) │  │  + Tracking  │    │
//! │                    └──────────────┘  └──────┬───────┘  └──────▲───────┘    │
//! │                                             │                 │            │
//! │                    ┌──────────────┐         │          ┌──────┴───────┐    │
//! │                    │   Response   │         │          │   Decoder    │    │
//! │                    │   Listener   │         │          │  (ffmpeg)    │    │
//! │                    └──────▲───────┘         │          └──────▲───────┘    │
//! │                           │                 │                 │ stdin      │
//! │                    ┌──────┴─────────────────▼───┐      ┌──────┴───────┐    │
//! │                    │   control socket :8889     │      │ video ingress│    │
//! │                    └──────▲─────────────────┬───┘      │ socket :11111│    │
//! │                           │                 │          └──────▲───────┘    │
//! └───────────────────────────┼─────────────────┼─────────────────┼────────────┘
//!                             │ ok / error / n  │ "up 30"         │ H.264
//!                             │                 ▼                 │
//! ┌───────────────────────────┴─────────────────────────────────────┴───────────┐
//! │                         VEHICLE 192.168.10.1:8889                            │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod video;
pub mod worker;

pub use error::{Error, Result};
pub use session::{Session, SessionStatus};

/// Application-wide constants
pub mod constants {
    /// Host port for commands and their replies
    pub const DEFAULT_CONTROL_PORT: u16 = 8889;

    /// Host port the vehicle streams video to
    pub const DEFAULT_VIDEO_PORT: u16 = 11111;

    /// Default cruising speed in cm/s
    pub const DEFAULT_SPEED: u32 = 10;

    /// Default move distance, in the configured unit system
    pub const DEFAULT_DISTANCE: f64 = 0.30;

    /// Default rotation in degrees
    pub const DEFAULT_DEGREES: u32 = 10;

    /// Decoded frame geometry (960x720 scaled to a third)
    pub const FRAME_WIDTH: u32 = 320;
    pub const FRAME_HEIGHT: u32 = 240;

    /// Largest control reply read in one datagram
    pub const MAX_RESPONSE_SIZE: usize = 3000;

    /// Largest video datagram read from the vehicle
    pub const MAX_VIDEO_PACKET_SIZE: usize = 2048;
}
