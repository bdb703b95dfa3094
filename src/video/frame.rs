//! Decoded video frames (packed BGR, no padding)

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

use crate::detect::Detection;
use crate::error::VideoError;

/// Pixel color in BGR order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bgr(pub [u8; 3]);

impl Bgr {
    pub const GREEN: Bgr = Bgr([0, 255, 0]);
    pub const CYAN: Bgr = Bgr([255, 255, 0]);
}

/// A single decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    /// Position in the decoder output, starting at 0
    pub index: u64,
}

impl Frame {
    /// Wrap a raw BGR buffer; its length must be `width * height * 3`
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>, index: u64) -> Result<Self, VideoError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(VideoError::Encode(format!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, data, index })
    }

    /// Uniform frame, mostly for tests and placeholders
    pub fn filled(width: u32, height: u32, color: Bgr) -> Self {
        let data = color.0.repeat(width as usize * height as usize);
        Self { width, height, data, index: 0 }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Bgr> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some(Bgr([self.data[offset], self.data[offset + 1], self.data[offset + 2]]))
    }

    fn put(&mut self, x: i64, y: i64, color: Bgr) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        self.data[offset..offset + 3].copy_from_slice(&color.0);
    }

    /// Outline a detection box, clipped to the frame
    pub fn draw_box(&mut self, detection: &Detection, color: Bgr, thickness: u32) {
        let left = detection.x as i64;
        let top = detection.y as i64;
        let right = left + detection.width as i64;
        let bottom = top + detection.height as i64;

        for t in 0..thickness as i64 {
            for x in left..=right {
                self.put(x, top + t, color);
                self.put(x, bottom - t, color);
            }
            for y in top..=bottom {
                self.put(left + t, y, color);
                self.put(right - t, y, color);
            }
        }
    }

    /// Horizontal and vertical hairlines of half-length `arm` around `(cx, cy)`
    pub fn draw_crosshair(&mut self, cx: i64, cy: i64, arm: i64, color: Bgr) {
        for d in -arm..=arm {
            self.put(cx + d, cy, color);
            self.put(cx, cy + d, color);
        }
    }

    /// Encode as baseline JPEG
    pub fn to_jpeg(&self, quality: u8) -> Result<Bytes, VideoError> {
        let rgb: Vec<u8> = self
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();
        let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(self.width, self.height, rgb)
            .ok_or_else(|| VideoError::Encode("failed to convert frame into image buffer".into()))?;

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .encode_image(&image)
            .map_err(|e| VideoError::Encode(format!("JPEG encode failed: {}", e)))?;
        Ok(Bytes::from(buffer))
    }
}
