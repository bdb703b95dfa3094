//! Mutable session toggles shared between the operator surface and the frame pipeline

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug)]
pub struct SessionFlags {
    tracking_enabled: AtomicBool,
    detect_enabled: AtomicBool,
    snapshot_requested: AtomicBool,
    /// Cruising speed in cm/s
    speed: AtomicU32,
}

impl SessionFlags {
    pub fn new(speed: u32) -> Self {
        Self {
            tracking_enabled: AtomicBool::new(true),
            detect_enabled: AtomicBool::new(false),
            snapshot_requested: AtomicBool::new(false),
            speed: AtomicU32::new(speed),
        }
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled.load(Ordering::SeqCst)
    }

    pub fn set_tracking(&self, enabled: bool) {
        self.tracking_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip tracking and return the new state
    pub fn toggle_tracking(&self) -> bool {
        !self.tracking_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn detect_enabled(&self) -> bool {
        self.detect_enabled.load(Ordering::SeqCst)
    }

    pub fn set_detect(&self, enabled: bool) {
        self.detect_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn snapshot_requested(&self) -> bool {
        self.snapshot_requested.load(Ordering::SeqCst)
    }

    pub fn request_snapshot(&self) {
        self.snapshot_requested.store(true, Ordering::SeqCst);
    }

    pub fn clear_snapshot(&self) {
        self.snapshot_requested.store(false, Ordering::SeqCst);
    }

    pub fn speed(&self) -> u32 {
        self.speed.load(Ordering::SeqCst)
    }

    pub fn set_speed(&self, speed: u32) {
        self.speed.store(speed, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_toggle() {
        let flags = SessionFlags::new(10);
        assert!(flags.tracking_enabled());
        assert!(!flags.detect_enabled());
        assert!(!flags.toggle_tracking());
        assert!(!flags.tracking_enabled());
        assert!(flags.toggle_tracking());
    }
}
