//! Error types for the drone link

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control/video transport errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The response listener hit a fatal socket error; the session must be recreated
    #[error("Response listener has stopped")]
    ListenerStopped,

    #[error("Command channel is closed")]
    Closed,
}

/// Command validation and safety errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Battery level critical: {0}%")]
    BatteryCritical(u8),
}

/// Video bridge errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Failed to spawn decoder: {0}")]
    DecoderSpawn(String),

    #[error("Decoder exited: {0}")]
    DecoderExited(String),

    #[error("Decoder pipe unavailable")]
    PipeUnavailable,

    #[error("Frame encoding failed: {0}")]
    Encode(String),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),
}

/// Face detector errors
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector unavailable: {0}")]
    Unavailable(String),

    #[error("Detection failed: {0}")]
    Failed(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
