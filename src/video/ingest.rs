//! Video ingress: UDP payloads forwarded byte-for-byte into the decoder

use std::io::Write;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::MAX_VIDEO_PACKET_SIZE;
use crate::error::VideoError;
use crate::network::udp::is_transient;
use crate::worker::{join_within, Fault, FaultSender, StopFlag};

/// Ingress statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngressStats {
    pub packets: u64,
    pub bytes: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    packets: AtomicU64,
    bytes: AtomicU64,
    timeouts: AtomicU64,
}

/// Thread pumping the video socket into a writer (the decoder's stdin)
pub struct VideoIngress {
    stop: StopFlag,
    counters: Arc<Counters>,
    thread_handle: Option<JoinHandle<()>>,
}

impl VideoIngress {
    pub fn spawn<W>(socket: Arc<UdpSocket>, mut sink: W, faults: FaultSender) -> Result<Self, VideoError>
    where
        W: Write + Send + 'static,
    {
        let stop = StopFlag::new();
        let counters = Arc::new(Counters::default());
        let loop_stop = stop.clone();
        let loop_counters = counters.clone();

        let handle = thread::Builder::new()
            .name("video-ingress".into())
            .spawn(move || {
                let mut buf = [0u8; MAX_VIDEO_PACKET_SIZE];
                while !loop_stop.is_stopped() {
                    let len = match socket.recv_from(&mut buf) {
                        Ok((len, _)) => len,
                        Err(e) if is_transient(&e) => {
                            loop_counters.timeouts.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(action = "receive_video", "No video within timeout");
                            continue;
                        }
                        Err(e) => {
                            if !loop_stop.is_stopped() {
                                tracing::error!(action = "receive_video", error = %e);
                                let _ = faults.try_send(Fault::Ingress(e.to_string()));
                            }
                            break;
                        }
                    };

                    loop_counters.packets.fetch_add(1, Ordering::Relaxed);
                    loop_counters.bytes.fetch_add(len as u64, Ordering::Relaxed);

                    if let Err(e) = sink.write_all(&buf[..len]).and_then(|_| sink.flush()) {
                        tracing::error!(action = "receive_video", error = %e, "Decoder input closed");
                        let _ = faults.try_send(Fault::Ingress(format!("decoder write failed: {}", e)));
                        break;
                    }
                }
                tracing::debug!("Video ingress exited");
            })
            .map_err(|e| VideoError::DecoderSpawn(e.to_string()))?;

        Ok(Self {
            stop,
            counters,
            thread_handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> IngressStats {
        IngressStats {
            packets: self.counters.packets.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Signal and join with a bound. Returns whether the thread was joined.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.stop.stop();
        match self.thread_handle.take() {
            Some(handle) => join_within(handle, timeout, Duration::from_millis(10)).is_some(),
            None => true,
        }
    }
}

impl Drop for VideoIngress {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::udp::create_socket;
    use crate::worker::fault_channel;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "decoder gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn video_socket() -> (Arc<UdpSocket>, std::net::SocketAddr) {
        let socket = create_socket("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20)).unwrap();
        let addr = socket.local_addr().unwrap();
        (Arc::new(socket), addr)
    }

    #[test]
    fn test_forwards_payloads_in_order() {
        let (socket, addr) = video_socket();
        let sink = SharedSink::default();
        let (tx, _rx) = fault_channel();
        let mut ingress = VideoIngress::spawn(socket, sink.clone(), tx).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"abc", addr).unwrap();
        sender.send_to(b"def", addr).unwrap();

        for _ in 0..200 {
            if sink.0.lock().len() == 6 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(&sink.0.lock()[..], b"abcdef");
        assert_eq!(ingress.stats().packets, 2);
        assert!(ingress.stop(Duration::from_secs(1)));
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let (socket, addr) = video_socket();
        let (tx, rx) = fault_channel();
        let mut ingress = VideoIngress::spawn(socket, BrokenSink, tx).unwrap();

        UdpSocket::bind("127.0.0.1:0").unwrap().send_to(b"x", addr).unwrap();

        let fault = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(fault, Fault::Ingress(_)));
        assert!(ingress.stop(Duration::from_secs(1)));
        assert!(!ingress.is_running());
    }
}
