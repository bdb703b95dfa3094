//! Background reader for control-channel replies
//!
//! The vehicle answers asynchronously on the port commands are sent from.
//! Replies are not tagged with the command they answer, so the listener keeps
//! only the most recent one: a single slot, last write wins. Anything reading
//! the slot after a send may see a reply to a different command.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::MAX_RESPONSE_SIZE;
use crate::error::LinkError;
use crate::network::udp::is_transient;
use crate::protocol::{decode_response, to_hex, ResponseText};
use crate::worker::{join_within, Fault, FaultSender, StopFlag};

/// One decoded control-channel datagram
#[derive(Debug, Clone)]
pub struct Response {
    pub payload: Bytes,
    pub text: ResponseText,
    pub from: SocketAddr,
    /// Arrival counter, starting at 1
    pub sequence: u64,
    pub received_at: Instant,
}

impl Response {
    /// Decoded text, if the payload decoded at all
    pub fn as_text(&self) -> Option<&str> {
        match &self.text {
            ResponseText::Utf8(text) | ResponseText::Latin1(text) => Some(text),
            ResponseText::Raw => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.as_text() == Some("ok")
    }
}

/// Single-slot mailbox for the most recent reply
#[derive(Debug, Default)]
pub struct LatestResponse {
    slot: Mutex<Option<Response>>,
    arrived: Condvar,
    sequence: AtomicU64,
}

impl LatestResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot and wake waiters. Returns the arrival sequence.
    pub fn publish(&self, payload: Bytes, text: ResponseText, from: SocketAddr) -> u64 {
        let mut slot = self.slot.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(Response {
            payload,
            text,
            from,
            sequence,
            received_at: Instant::now(),
        });
        self.arrived.notify_all();
        sequence
    }

    pub fn latest(&self) -> Option<Response> {
        self.slot.lock().clone()
    }

    /// Sequence of the last published reply (0 if none yet)
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Block until a reply newer than `after` arrives, or `timeout` elapses
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Response> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(response) = slot.as_ref().filter(|r| r.sequence > after) {
                return Some(response.clone());
            }
            if self.arrived.wait_until(&mut slot, deadline).timed_out() {
                return slot.as_ref().filter(|r| r.sequence > after).cloned();
            }
        }
    }
}

/// Listener statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ListenerStats {
    pub datagrams: u64,
    pub bytes: u64,
    pub latin1_decodes: u64,
    pub raw_payloads: u64,
}

#[derive(Default)]
struct Counters {
    datagrams: AtomicU64,
    bytes: AtomicU64,
    latin1_decodes: AtomicU64,
    raw_payloads: AtomicU64,
}

/// Thread reading the control socket into a [`LatestResponse`]
pub struct ResponseListener {
    /// Cooperative stop signal checked between receives
    stop: StopFlag,
    /// True while the receive loop runs
    alive: Arc<AtomicBool>,
    /// Datagram counters
    counters: Arc<Counters>,
    /// Listener thread handle
    thread_handle: Option<JoinHandle<()>>,
}

impl ResponseListener {
    /// Start reading `socket` until stopped or a fatal socket error
    pub fn spawn(
        socket: Arc<UdpSocket>,
        latest: Arc<LatestResponse>,
        faults: FaultSender,
    ) -> Result<Self, LinkError> {
        let stop = StopFlag::new();
        let alive = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let loop_stop = stop.clone();
        let loop_alive = alive.clone();
        let loop_counters = counters.clone();

        let handle = thread::Builder::new()
            .name("response-listener".into())
            .spawn(move || {
                receive_loop(
                    |buf| socket.recv_from(buf),
                    &latest,
                    &loop_counters,
                    &loop_stop,
                    &loop_alive,
                    &faults,
                );
            })
            .map_err(|e| LinkError::ReceiveFailed(e.to_string()))?;

        Ok(Self {
            stop,
            alive,
            counters,
            thread_handle: Some(handle),
        })
    }

    /// False once the loop has exited for any reason
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Liveness flag shared with senders
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            datagrams: self.counters.datagrams.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            latin1_decodes: self.counters.latin1_decodes.load(Ordering::Relaxed),
            raw_payloads: self.counters.raw_payloads.load(Ordering::Relaxed),
        }
    }

    /// Signal the loop and wait up to `timeout` for it. The loop notices the
    /// signal within one socket read timeout. Returns whether the thread was joined.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.stop.stop();
        match self.thread_handle.take() {
            Some(handle) => join_within(handle, timeout, Duration::from_millis(10)).is_some(),
            None => true,
        }
    }
}

impl Drop for ResponseListener {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Read datagrams until stopped or a non-transient receive error.
///
/// The thread owning the socket handle ends here, so returning releases it.
fn receive_loop<R>(
    mut recv: R,
    latest: &LatestResponse,
    counters: &Counters,
    stop: &StopFlag,
    alive: &AtomicBool,
    faults: &FaultSender,
) where
    R: FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)>,
{
    let mut buf = [0u8; MAX_RESPONSE_SIZE];
    while !stop.is_stopped() {
        match recv(&mut buf) {
            Ok((len, from)) => record(latest, counters, &buf[..len], from),
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                if stop.is_stopped() {
                    break;
                }
                tracing::error!(action = "receive_response", error = %e, "Control socket failed");
                let _ = faults.try_send(Fault::Listener(e.to_string()));
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
    tracing::debug!("Response listener exited");
}

fn record(latest: &LatestResponse, counters: &Counters, payload: &[u8], from: SocketAddr) {
    counters.datagrams.fetch_add(1, Ordering::Relaxed);
    counters.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);

    let text = decode_response(payload);
    match &text {
        ResponseText::Utf8(decoded) => {
            tracing::info!(action = "receive_response", response = %decoded, from = %from);
        }
        ResponseText::Latin1(decoded) => {
            counters.latin1_decodes.fetch_add(1, Ordering::Relaxed);
            tracing::info!(action = "receive_response", response = %decoded, from = %from, encoding = "latin-1");
        }
        ResponseText::Raw => {
            counters.raw_payloads.fetch_add(1, Ordering::Relaxed);
            tracing::info!(action = "receive_response", raw_bytes = %to_hex(payload), from = %from);
        }
    }

    latest.publish(Bytes::copy_from_slice(payload), text, from);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::udp::create_socket;
    use crate::worker::fault_channel;

    fn listener_pair() -> (ResponseListener, Arc<LatestResponse>, UdpSocket, SocketAddr) {
        let socket = create_socket("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20)).unwrap();
        let addr = socket.local_addr().unwrap();
        let latest = Arc::new(LatestResponse::new());
        let (tx, _rx) = fault_channel();
        let listener = ResponseListener::spawn(Arc::new(socket), latest.clone(), tx).unwrap();
        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        (listener, latest, vehicle, addr)
    }

    #[test]
    fn test_publish_overwrites() {
        let latest = LatestResponse::new();
        let from: SocketAddr = "127.0.0.1:1".parse().unwrap();
        latest.publish(Bytes::from_static(b"ok"), ResponseText::Utf8("ok".into()), from);
        let seq = latest.publish(Bytes::from_static(b"87"), ResponseText::Utf8("87".into()), from);

        let response = latest.latest().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(response.sequence, 2);
        assert_eq!(response.as_text(), Some("87"));
    }

    #[test]
    fn test_wait_newer_times_out() {
        let latest = LatestResponse::new();
        assert!(latest.wait_newer(0, Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_listener_records_utf8() {
        let (mut listener, latest, vehicle, addr) = listener_pair();
        vehicle.send_to(b"ok", addr).unwrap();

        let response = latest.wait_newer(0, Duration::from_secs(2)).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.from, vehicle.local_addr().unwrap());
        assert!(listener.stop(Duration::from_secs(1)));
    }

    #[test]
    fn test_listener_records_undecodable_payload() {
        let (mut listener, latest, vehicle, addr) = listener_pair();
        vehicle.send_to(&[0xff, 0x00, 0x01], addr).unwrap();

        let response = latest.wait_newer(0, Duration::from_secs(2)).unwrap();
        assert_eq!(response.text, ResponseText::Raw);
        assert_eq!(&response.payload[..], &[0xff, 0x00, 0x01]);
        assert_eq!(listener.stats().raw_payloads, 1);
        assert!(listener.stop(Duration::from_secs(1)));
        assert!(!listener.is_alive());
    }

    #[test]
    fn test_fatal_receive_error_records_fault() {
        let latest = LatestResponse::new();
        let counters = Counters::default();
        let stop = StopFlag::new();
        let alive = AtomicBool::new(true);
        let (tx, rx) = fault_channel();

        let from: SocketAddr = "127.0.0.1:8889".parse().unwrap();
        let mut script = vec![
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
            Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out")),
            Ok((2, from)),
        ];
        receive_loop(
            |buf: &mut [u8]| {
                let next = script.pop().unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "exhausted")));
                if next.is_ok() {
                    buf[..2].copy_from_slice(b"ok");
                }
                next
            },
            &latest,
            &counters,
            &stop,
            &alive,
            &tx,
        );

        assert!(!alive.load(Ordering::SeqCst));
        assert!(latest.latest().unwrap().is_ok());
        assert_eq!(counters.datagrams.load(Ordering::Relaxed), 1);
        match rx.try_recv() {
            Ok(Fault::Listener(message)) => assert!(message.contains("reset by peer")),
            other => panic!("expected listener fault, got {:?}", other),
        }
    }

    #[test]
    fn test_receive_error_after_stop_is_quiet() {
        let latest = LatestResponse::new();
        let counters = Counters::default();
        let stop = StopFlag::new();
        let alive = AtomicBool::new(true);
        let (tx, rx) = fault_channel();

        let loop_stop = stop.clone();
        receive_loop(
            move |_buf: &mut [u8]| {
                loop_stop.stop();
                Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"))
            },
            &latest,
            &counters,
            &stop,
            &alive,
            &tx,
        );

        assert!(!alive.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_joins_within_one_read_slice() {
        let (mut listener, _latest, _vehicle, _addr) = listener_pair();
        let started = Instant::now();
        assert!(listener.stop(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
