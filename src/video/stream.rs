//! Frame extraction from the decoder's output stream
//!
//! The decoder emits frames back to back with no framing, so every read must
//! consume exactly one frame's worth of bytes. Several readers may share a
//! source; each frame is delivered to exactly one of them.

use parking_lot::Mutex;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::video::decoder::DecoderProcess;
use crate::video::frame::Frame;
use crate::worker::{Fault, FaultSender};

/// Shared decoder output
pub struct FrameSource {
    reader: Mutex<Box<dyn Read + Send>>,
    decoder: Option<Arc<DecoderProcess>>,
    width: u32,
    height: u32,
    faults: FaultSender,
    frames_read: AtomicU64,
    ended: AtomicBool,
}

impl FrameSource {
    pub fn new<R>(
        reader: R,
        width: u32,
        height: u32,
        decoder: Option<Arc<DecoderProcess>>,
        faults: FaultSender,
    ) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            reader: Mutex::new(Box::new(reader)),
            decoder,
            width,
            height,
            faults,
            frames_read: AtomicU64::new(0),
            ended: AtomicBool::new(false),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    /// True once the decoder output has closed
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Block until one full frame is available. `None` once the stream has ended.
    pub fn read_frame(&self) -> Option<Frame> {
        if self.has_ended() {
            return None;
        }

        let mut buf = vec![0u8; self.frame_size()];
        let result = self.reader.lock().read_exact(&mut buf);
        match result {
            Ok(()) => {
                let index = self.frames_read.fetch_add(1, Ordering::Relaxed);
                Frame::from_bgr(self.width, self.height, buf, index).ok()
            }
            Err(e) => {
                if !self.ended.swap(true, Ordering::SeqCst) {
                    let status = self
                        .decoder
                        .as_ref()
                        .and_then(|d| d.exit_status())
                        .unwrap_or_else(|| "still running".to_string());
                    tracing::error!(
                        action = "read_frame",
                        error = %e,
                        decoder = %status,
                        "Decoder output closed"
                    );
                    let _ = self
                        .faults
                        .try_send(Fault::Decoder(format!("{} (decoder {})", e, status)));
                }
                None
            }
        }
    }

    /// Lazy frame sequence over this source
    pub fn reader(self: &Arc<Self>) -> FrameReader {
        FrameReader {
            source: Arc::clone(self),
        }
    }
}

/// Iterator of decoded frames; ends when the decoder output closes
pub struct FrameReader {
    source: Arc<FrameSource>,
}

impl Iterator for FrameReader {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.source.read_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::fault_channel;
    use std::io::Cursor;

    #[test]
    fn test_reads_exact_frames_then_ends() {
        let mut bytes = vec![1u8; 2 * 2 * 3];
        bytes.extend(vec![2u8; 2 * 2 * 3]);
        bytes.extend(vec![3u8; 5]); // trailing partial frame
        let (tx, rx) = fault_channel();
        let source = Arc::new(FrameSource::new(Cursor::new(bytes), 2, 2, None, tx));

        let frames: Vec<Frame> = source.reader().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data(), &[1u8; 12][..]);
        assert_eq!(frames[1].index, 1);
        assert!(source.has_ended());
        assert!(matches!(rx.try_recv(), Ok(Fault::Decoder(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_shared_readers_split_frames() {
        let bytes = vec![0u8; 4 * 3 * 3];
        let (tx, _rx) = fault_channel();
        let source = Arc::new(FrameSource::new(Cursor::new(bytes), 1, 3, None, tx));

        let mut a = source.reader();
        let mut b = source.reader();
        assert_eq!(a.next().unwrap().index, 0);
        assert_eq!(b.next().unwrap().index, 1);
        assert_eq!(a.next().unwrap().index, 2);
        assert_eq!(source.frames_read(), 3);
    }
}
