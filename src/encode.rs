//! Preview frame encoding: JPEG at a fixed quality, then standard base64 text.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;

use crate::frame::Frame;

/// Default JPEG quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Converts frames into JSON-safe text payloads.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("JPEG quality must be within 1..=100, got {}", quality));
        }
        Ok(Self { quality })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compress a frame to JPEG bytes.
    pub fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(frame.image())
            .with_context(|| {
                format!(
                    "encode frame #{} ({}x{}) as JPEG",
                    frame.sequence(),
                    frame.width(),
                    frame.height()
                )
            })?;
        Ok(jpeg)
    }

    /// Compress a frame to JPEG and return it as base64 text.
    pub fn encode(&self, frame: &Frame) -> Result<String> {
        let jpeg = self.encode_jpeg(frame)?;
        Ok(STANDARD.encode(jpeg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn test_frame() -> Frame {
        let image = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]));
        Frame::new(image, 7)
    }

    #[test]
    fn encoded_text_decodes_to_same_dimensions() {
        let frame = test_frame();
        let text = FrameEncoder::default().encode(&frame).unwrap();

        let bytes = STANDARD.decode(text.as_bytes()).unwrap();
        let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn encoding_is_deterministic_and_leaves_frame_untouched() {
        let frame = test_frame();
        let before = frame.pixels().to_vec();
        let encoder = FrameEncoder::new(80).unwrap();

        let a = encoder.encode(&frame).unwrap();
        let b = encoder.encode(&frame).unwrap();
        assert_eq!(a, b);
        assert_eq!(frame.pixels(), before.as_slice());
    }

    #[test]
    fn encoded_text_is_printable_ascii() {
        let text = FrameEncoder::default().encode(&test_frame()).unwrap();
        assert!(text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='));
    }

    #[test]
    fn frames_beyond_jpeg_limits_fail_with_context() {
        let frame = Frame::new(RgbImage::new(70_000, 1), 3);
        let err = FrameEncoder::default().encode(&frame).unwrap_err();
        assert!(format!("{err}").contains("frame #3 (70000x1)"));
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        assert!(FrameEncoder::new(0).is_err());
        assert!(FrameEncoder::new(101).is_err());
        assert_eq!(FrameEncoder::new(100).unwrap().quality(), 100);
    }
}
