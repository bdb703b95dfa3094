//! Autonomous flight behaviours: patrol cycle and face tracking

pub mod patrol;
pub mod tracking;

pub use patrol::{PatrolController, PatrolState, StopOutcome};
pub use tracking::{Correction, Offset, TrackingController};
