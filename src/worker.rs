//! Background thread helpers: cooperative stop flags and bounded joins

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Terminal condition reported by a background loop before it exits
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "source", content = "reason", rename_all = "snake_case")]
pub enum Fault {
    /// Control socket failed; no further responses will be observed
    Listener(String),
    /// Video socket or decoder stdin failed; no further video is forwarded
    Ingress(String),
    /// Decoder process exited or its stdout closed
    Decoder(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Listener(reason) => write!(f, "response listener stopped: {}", reason),
            Fault::Ingress(reason) => write!(f, "video ingress stopped: {}", reason),
            Fault::Decoder(reason) => write!(f, "decoder stopped: {}", reason),
        }
    }
}

pub type FaultSender = crossbeam_channel::Sender<Fault>;
pub type FaultReceiver = crossbeam_channel::Receiver<Fault>;

/// Bounded fault queue shared by every background loop of a session
pub fn fault_channel() -> (FaultSender, FaultReceiver) {
    crossbeam_channel::bounded(16)
}

/// Shared cancellation signal checked by loops on every iteration
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleep for `total`, waking early once the flag is set.
    /// Returns `true` if the flag was observed.
    pub fn sleep(&self, total: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

/// Wait up to `timeout` for a thread to finish, polling every `poll`.
///
/// Joins and returns its output if it finished in time. Otherwise the handle
/// is dropped (detaching the thread) and `None` is returned.
pub fn join_within<T>(handle: JoinHandle<T>, timeout: Duration, poll: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            tracing::warn!("Thread {} did not exit within {:?}, detaching", name, timeout);
            return None;
        }
        thread::sleep(poll);
    }
    handle.join().ok()
}
