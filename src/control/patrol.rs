//! Autonomous patrol: climb, rotate, descend, repeat
//!
//! At most one patrol thread runs at a time. Stopping is cooperative and
//! bounded: if the thread does not exit within the stop timeout the
//! controller reports it as abandoned and returns to `Idle` anyway, so a late
//! patrol step may still reach the vehicle after `stop` returns.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{PatrolConfig, Units};
use crate::network::CommandChannel;
use crate::protocol::{Command, Direction, Rotation};
use crate::worker::StopFlag;

/// Granularity of the dwell sleep between steps
const DWELL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatrolState {
    Idle,
    Running,
    Stopping,
}

/// How a stop request concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Patrol was not running
    NotRunning,
    /// The patrol thread observed cancellation and was joined
    Joined,
    /// The thread was still alive at the timeout and has been detached
    Abandoned,
}

struct Inner {
    state: PatrolState,
    /// Cancellation signal of the current run
    cancel: Option<StopFlag>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Starts and stops the patrol thread
pub struct PatrolController {
    /// Channel patrol steps are sent on (blocking sends)
    channel: Arc<CommandChannel>,
    /// Step sizes, dwell and stop timing
    config: PatrolConfig,
    /// Units the step distance is given in
    units: Units,
    /// Held by the patrol thread for its whole run
    patrol_lock: Arc<Mutex<()>>,
    /// State machine plus the running thread
    inner: Mutex<Inner>,
    /// Steps transmitted across all runs
    steps_sent: Arc<AtomicU64>,
}

impl PatrolController {
    pub fn new(channel: Arc<CommandChannel>, config: PatrolConfig, units: Units) -> Self {
        Self {
            channel,
            config,
            units,
            patrol_lock: Arc::new(Mutex::new(())),
            inner: Mutex::new(Inner {
                state: PatrolState::Idle,
                cancel: None,
                thread_handle: None,
            }),
            steps_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> PatrolState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == PatrolState::Running
    }

    pub fn steps_sent(&self) -> u64 {
        self.steps_sent.load(Ordering::Relaxed)
    }

    /// The fixed cycle: up, clockwise, down
    pub fn steps(&self) -> [Command; 3] {
        let cm = self.units.to_centimeters(self.config.step_distance);
        [
            Command::Move { direction: Direction::Up, cm },
            Command::Rotate {
                rotation: Rotation::Clockwise,
                degrees: self.config.step_degrees,
            },
            Command::Move { direction: Direction::Down, cm },
        ]
    }

    /// Start patrolling. Returns `false` (no-op) unless currently idle.
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != PatrolState::Idle {
            return false;
        }

        let cancel = StopFlag::new();
        let run = PatrolRun {
            channel: self.channel.clone(),
            lock: self.patrol_lock.clone(),
            cancel: cancel.clone(),
            steps: self.steps(),
            dwell: self.config.dwell(),
            steps_sent: self.steps_sent.clone(),
        };

        match thread::Builder::new()
            .name("patrol".into())
            .spawn(move || run.run())
        {
            Ok(handle) => {
                inner.state = PatrolState::Running;
                inner.cancel = Some(cancel);
                inner.thread_handle = Some(handle);
                tracing::info!("Patrol started");
                true
            }
            Err(e) => {
                tracing::error!("Failed to spawn patrol thread: {}", e);
                false
            }
        }
    }

    /// Cancel and wait (bounded) for the patrol thread.
    ///
    /// Always leaves the controller `Idle`, whether or not the thread exited.
    pub fn stop(&self) -> StopOutcome {
        let handle = {
            let mut inner = self.inner.lock();
            if inner.state != PatrolState::Running {
                return StopOutcome::NotRunning;
            }
            if let Some(cancel) = inner.cancel.take() {
                cancel.stop();
            }
            inner.state = PatrolState::Stopping;
            inner.thread_handle.take()
        };

        let deadline = Instant::now() + self.config.stop_timeout();
        let outcome = match handle {
            Some(handle) => {
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(self.config.poll_interval());
                }
                if handle.is_finished() {
                    let _ = handle.join();
                    StopOutcome::Joined
                } else {
                    tracing::warn!(
                        "Patrol thread still running after {:?}; detaching",
                        self.config.stop_timeout()
                    );
                    StopOutcome::Abandoned
                }
            }
            None => StopOutcome::Joined,
        };

        self.inner.lock().state = PatrolState::Idle;
        tracing::info!("Patrol stopped ({:?})", outcome);
        outcome
    }
}

struct PatrolRun {
    channel: Arc<CommandChannel>,
    lock: Arc<Mutex<()>>,
    cancel: StopFlag,
    steps: [Command; 3],
    dwell: Duration,
    steps_sent: Arc<AtomicU64>,
}

impl PatrolRun {
    fn run(self) {
        let Some(_guard) = self.lock.try_lock() else {
            tracing::warn!(action = "patrol", status = "not acquired");
            return;
        };
        tracing::info!(action = "patrol", status = "acquired");

        for step in self.steps.iter().cycle() {
            if self.cancel.is_stopped() {
                break;
            }
            match self.channel.send_command(step, true) {
                Ok(_) => {
                    self.steps_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!(action = "patrol", command = %step, error = %e, "Patrol aborted");
                    break;
                }
            }
            if self.cancel.sleep(self.dwell, DWELL_SLICE) {
                break;
            }
        }
        tracing::info!(action = "patrol", status = "released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{LatestResponse, ResponseListener};
    use crate::network::udp::create_socket;
    use crate::worker::fault_channel;
    use std::net::UdpSocket;

    struct Harness {
        patrol: PatrolController,
        listener: ResponseListener,
        vehicle: UdpSocket,
    }

    fn harness(config: PatrolConfig) -> Harness {
        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        vehicle.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let socket = Arc::new(create_socket("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20)).unwrap());
        let latest = Arc::new(LatestResponse::new());
        let (tx, _rx) = fault_channel();
        let listener = ResponseListener::spawn(socket.clone(), latest.clone(), tx).unwrap();
        let channel = Arc::new(CommandChannel::new(
            socket,
            vehicle.local_addr().unwrap(),
            latest,
            listener.alive_flag(),
            Duration::from_millis(5),
        ));
        Harness {
            patrol: PatrolController::new(channel, config, Units::Metric),
            listener,
            vehicle,
        }
    }

    fn fast_config() -> PatrolConfig {
        PatrolConfig {
            dwell_ms: 10,
            poll_ms: 5,
            stop_timeout_ms: 2000,
            ..PatrolConfig::default()
        }
    }

    fn recv(vehicle: &UdpSocket) -> String {
        let mut buf = [0u8; 64];
        let (len, _) = vehicle.recv_from(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..len]).to_string()
    }

    #[test]
    fn test_cycle_order() {
        let mut h = harness(fast_config());
        assert!(h.patrol.start());

        let sent: Vec<String> = (0..4).map(|_| recv(&h.vehicle)).collect();
        assert_eq!(sent, vec!["up 30", "cw 10", "down 30", "up 30"]);

        assert_eq!(h.patrol.stop(), StopOutcome::Joined);
        assert_eq!(h.patrol.state(), PatrolState::Idle);
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut h = harness(fast_config());
        assert!(h.patrol.start());
        assert!(!h.patrol.start());
        assert!(h.patrol.is_running());
        h.patrol.stop();
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut h = harness(fast_config());
        assert_eq!(h.patrol.stop(), StopOutcome::NotRunning);
        assert_eq!(h.patrol.state(), PatrolState::Idle);
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_stop_is_bounded_when_thread_is_stuck() {
        let config = PatrolConfig {
            dwell_ms: 10,
            poll_ms: 5,
            stop_timeout_ms: 50,
            ..PatrolConfig::default()
        };
        let mut h = harness(config);

        // Hold the command lock so the patrol thread blocks inside its first send
        let channel = h.patrol.channel.clone();
        let held = channel.lock_for_test();
        assert!(h.patrol.start());
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        assert_eq!(h.patrol.stop(), StopOutcome::Abandoned);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(h.patrol.state(), PatrolState::Idle);

        drop(held);
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_restart_after_stop() {
        let mut h = harness(fast_config());
        assert!(h.patrol.start());
        assert_eq!(recv(&h.vehicle), "up 30");
        h.patrol.stop();

        assert!(h.patrol.start());
        assert!(h.patrol.is_running());
        h.patrol.stop();
        h.listener.stop(Duration::from_secs(1));
    }
}
