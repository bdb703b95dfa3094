//! Single-flight command channel
//!
//! One command at a time owns the control socket. The lock covers only the
//! socket write; the settle wait and response read happen after release, so
//! the reply observed is whatever the listener published last.
//!
//! Closing the channel drops its handle on the socket, so the port is freed
//! once the listener has exited too.

use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::LinkError;
use crate::network::listener::{LatestResponse, Response};
use crate::protocol::{to_hex, Command, ResponseText};

/// Result of a send attempt
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Non-blocking send found the channel busy; nothing was transmitted
    Dropped,
    /// Transmitted; carries the first reply published after transmission, if any
    Sent(Option<Response>),
}

impl SendOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            SendOutcome::Sent(response) => response.as_ref(),
            SendOutcome::Dropped => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, SendOutcome::Dropped)
    }
}

/// Channel statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ChannelStats {
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub send_failures: u64,
    pub responses_observed: u64,
}

#[derive(Default)]
struct Counters {
    commands_sent: AtomicU64,
    commands_dropped: AtomicU64,
    send_failures: AtomicU64,
    responses_observed: AtomicU64,
}

/// Serialized command transmission over the control socket
pub struct CommandChannel {
    /// Control socket, shared with the listener; `None` once closed
    socket: Mutex<Option<Arc<UdpSocket>>>,
    /// Vehicle command address
    target: SocketAddr,
    /// Single-flight gate held for the socket write only
    lock: Mutex<()>,
    /// Slot the listener publishes replies into
    latest: Arc<LatestResponse>,
    /// Wait between transmission and reading the slot
    settle: Duration,
    /// Cleared by the listener when its loop exits
    listener_alive: Arc<AtomicBool>,
    /// Set by `close`; refuses all further sends
    closed: AtomicBool,
    /// Statistics
    counters: Counters,
}

impl CommandChannel {
    pub fn new(
        socket: Arc<UdpSocket>,
        target: SocketAddr,
        latest: Arc<LatestResponse>,
        listener_alive: Arc<AtomicBool>,
        settle: Duration,
    ) -> Self {
        Self {
            socket: Mutex::new(Some(socket)),
            target,
            lock: Mutex::new(()),
            latest,
            settle,
            listener_alive,
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Send a typed command
    pub fn send_command(&self, command: &Command, blocking: bool) -> Result<SendOutcome, LinkError> {
        self.send(&command.to_string(), blocking)
    }

    /// Transmit `command`, wait the settle interval, and report the latest reply.
    ///
    /// With `blocking = false` a busy channel drops the command instead of waiting.
    pub fn send(&self, command: &str, blocking: bool) -> Result<SendOutcome, LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        if !self.listener_alive.load(Ordering::SeqCst) {
            return Err(LinkError::ListenerStopped);
        }

        let before = {
            let guard = if blocking {
                Some(self.lock.lock())
            } else {
                self.lock.try_lock()
            };
            let Some(_guard) = guard else {
                self.counters.commands_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(action = "send_command", command, status = "not_acquired");
                return Ok(SendOutcome::Dropped);
            };

            let Some(socket) = self.socket.lock().clone() else {
                return Err(LinkError::Closed);
            };

            let before = self.latest.sequence();
            tracing::info!(action = "send_command", command);
            if let Err(e) = socket.send_to(command.as_bytes(), self.target) {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(action = "send_command", command, error = %e);
                return Err(LinkError::SendFailed(e.to_string()));
            }
            self.counters.commands_sent.fetch_add(1, Ordering::Relaxed);
            before
        };

        thread::sleep(self.settle);

        let response = self.latest.latest().filter(|r| r.sequence > before);
        match &response {
            Some(r) => {
                self.counters.responses_observed.fetch_add(1, Ordering::Relaxed);
                match &r.text {
                    ResponseText::Utf8(text) => {
                        tracing::info!(action = "command_response", command, response = %text);
                    }
                    ResponseText::Latin1(text) => {
                        tracing::info!(action = "command_response", command, response = %text, encoding = "latin-1");
                    }
                    ResponseText::Raw => {
                        tracing::info!(action = "command_response", command, raw_bytes = %to_hex(&r.payload));
                    }
                }
            }
            None => tracing::debug!(action = "command_response", command, "No reply within settle interval"),
        }

        Ok(SendOutcome::Sent(response))
    }

    /// Run [`send`](Self::send) on its own thread
    pub fn dispatch(
        self: &Arc<Self>,
        command: String,
        blocking: bool,
    ) -> Result<JoinHandle<Result<SendOutcome, LinkError>>, LinkError> {
        let channel = Arc::clone(self);
        thread::Builder::new()
            .name("command-send".into())
            .spawn(move || channel.send(&command, blocking))
            .map_err(|e| LinkError::SendFailed(e.to_string()))
    }

    /// Refuse all further sends and release the socket handle.
    /// In-flight sends finish their settle wait.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.socket.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_listener_alive(&self) -> bool {
        self.listener_alive.load(Ordering::SeqCst)
    }

    pub fn settle_interval(&self) -> Duration {
        self.settle
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    #[cfg(test)]
    pub(crate) fn lock_for_test(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            commands_sent: self.counters.commands_sent.load(Ordering::Relaxed),
            commands_dropped: self.counters.commands_dropped.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            responses_observed: self.counters.responses_observed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::listener::ResponseListener;
    use crate::network::udp::create_socket;
    use crate::worker::fault_channel;
    use std::collections::HashSet;

    struct Harness {
        channel: Arc<CommandChannel>,
        listener: ResponseListener,
        vehicle: UdpSocket,
    }

    fn harness(settle: Duration) -> Harness {
        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        vehicle.set_read_timeout(Some(Duration::from_millis(500))).unwrap();

        let socket = Arc::new(create_socket("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20)).unwrap());
        let latest = Arc::new(LatestResponse::new());
        let (tx, _rx) = fault_channel();
        let listener = ResponseListener::spawn(socket.clone(), latest.clone(), tx).unwrap();
        let channel = Arc::new(CommandChannel::new(
            socket,
            vehicle.local_addr().unwrap(),
            latest,
            listener.alive_flag(),
            settle,
        ));
        Harness { channel, listener, vehicle }
    }

    #[test]
    fn test_send_observes_reply() {
        let mut h = harness(Duration::from_millis(200));
        let vehicle = h.vehicle.try_clone().unwrap();
        let echo = thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (len, from) = vehicle.recv_from(&mut buf).unwrap();
            vehicle.send_to(b"ok", from).unwrap();
            String::from_utf8_lossy(&buf[..len]).to_string()
        });

        let outcome = h.channel.send("command", true).unwrap();
        assert_eq!(echo.join().unwrap(), "command");
        assert!(outcome.response().unwrap().is_ok());
        assert_eq!(h.channel.stats().commands_sent, 1);
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_send_without_reply_is_none() {
        let mut h = harness(Duration::from_millis(20));
        let outcome = h.channel.send("land", true).unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(None)));
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_non_blocking_send_dropped_when_busy() {
        let mut h = harness(Duration::from_millis(10));
        {
            let _held = h.channel.lock.lock();
            let outcome = h.channel.send("go 0 20 0 10", false).unwrap();
            assert!(outcome.is_dropped());
        }

        let mut buf = [0u8; 64];
        assert!(h.vehicle.recv_from(&mut buf).is_err());
        assert_eq!(h.channel.stats().commands_dropped, 1);
        assert_eq!(h.channel.stats().commands_sent, 0);
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_sends_arrive_whole() {
        let mut h = harness(Duration::from_millis(5));
        let handles: Vec<_> = (0..8)
            .map(|i| h.channel.dispatch(format!("up {}", 20 + i), true).unwrap())
            .collect();
        for handle in handles {
            assert!(!handle.join().unwrap().unwrap().is_dropped());
        }

        let mut seen = HashSet::new();
        let mut buf = [0u8; 64];
        for _ in 0..8 {
            let (len, _) = h.vehicle.recv_from(&mut buf).unwrap();
            seen.insert(String::from_utf8_lossy(&buf[..len]).to_string());
        }
        let expected: HashSet<String> = (0..8).map(|i| format!("up {}", 20 + i)).collect();
        assert_eq!(seen, expected);
        assert_eq!(h.channel.stats().commands_sent, 8);
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_closed_channel_refuses() {
        let mut h = harness(Duration::from_millis(5));
        h.channel.close();
        assert!(matches!(h.channel.send("land", true), Err(LinkError::Closed)));
        h.listener.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_close_releases_socket() {
        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = Arc::new(create_socket("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20)).unwrap());
        let channel = CommandChannel::new(
            socket.clone(),
            vehicle.local_addr().unwrap(),
            Arc::new(LatestResponse::new()),
            Arc::new(AtomicBool::new(true)),
            Duration::from_millis(5),
        );
        assert_eq!(Arc::strong_count(&socket), 2);

        channel.close();
        assert_eq!(Arc::strong_count(&socket), 1);
        assert!(channel.is_closed());
    }

    #[test]
    fn test_dead_listener_refuses() {
        let mut h = harness(Duration::from_millis(5));
        h.listener.stop(Duration::from_secs(1));
        assert!(matches!(h.channel.send("land", true), Err(LinkError::ListenerStopped)));
    }
}
