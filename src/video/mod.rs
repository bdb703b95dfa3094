//! Video bridge: UDP ingress → external decoder → fixed-size BGR frames

pub mod decoder;
pub mod frame;
pub mod ingest;
pub mod snapshot;
pub mod stream;

pub use decoder::DecoderProcess;
pub use frame::{Bgr, Frame};
pub use ingest::{IngressStats, VideoIngress};
pub use snapshot::SnapshotWriter;
pub use stream::{FrameReader, FrameSource};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LinkConfig, VideoConfig};
use crate::error::Result;
use crate::network::udp::create_socket;
use crate::worker::FaultSender;

/// Video pipeline statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct VideoStats {
    pub ingress: IngressStats,
    pub frames_read: u64,
    pub decoder_running: bool,
}

/// Owns the video socket, the decoder process and the ingress thread
pub struct VideoBridge {
    decoder: Arc<DecoderProcess>,
    ingress: VideoIngress,
    source: Arc<FrameSource>,
    local_addr: SocketAddr,
}

impl VideoBridge {
    /// Bind the video port, spawn the decoder and start forwarding
    pub fn start(link: &LinkConfig, video: &VideoConfig, faults: FaultSender) -> Result<Self> {
        let socket = create_socket(link.video_bind_addr(), link.video_timeout())?;
        let local_addr = socket.local_addr()?;

        let (decoder, stdin, stdout) = DecoderProcess::spawn(video)?;
        let decoder = Arc::new(decoder);

        let ingress = VideoIngress::spawn(Arc::new(socket), stdin, faults.clone())?;
        let source = Arc::new(FrameSource::new(
            stdout,
            video.frame_width,
            video.frame_height,
            Some(decoder.clone()),
            faults,
        ));

        tracing::info!("Video bridge listening on {}", local_addr);

        Ok(Self {
            decoder,
            ingress,
            source,
            local_addr,
        })
    }

    pub fn source(&self) -> Arc<FrameSource> {
        self.source.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> VideoStats {
        VideoStats {
            ingress: self.ingress.stats(),
            frames_read: self.source.frames_read(),
            decoder_running: self.decoder.is_running(),
        }
    }

    /// Stop ingress (releasing the socket), then kill the decoder
    pub fn shutdown(&mut self, timeout: Duration) {
        if !self.ingress.stop(timeout) {
            tracing::warn!("Video ingress did not stop within {:?}", timeout);
        }
        self.decoder.kill();
    }
}
