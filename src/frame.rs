//! Captured frames.
//!
//! - `Frame`: one RGB raster pulled from a `FrameSource`, owned by a single loop iteration.
//! - Annotation: outline boxes drawn on the frame before it is encoded for the preview stream,
//!   optionally captioned with `label confidence` when a `LabelFont` is loaded.
//!
//! Frames are never retained across iterations. The preview stream always encodes the
//! frame captured in the same iteration.

use std::fmt;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;

/// Outline colour for tracked detections.
pub const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Outline thickness in pixels.
pub const ANNOTATION_THICKNESS: u32 = 2;

/// Caption height in pixels.
pub const LABEL_FONT_SIZE: f32 = 16.0;

const RGB_CHANNELS: usize = 3;

/// Caption drawn above a detection box, e.g. `person 0.90`.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

/// TrueType font for detection captions.
#[derive(Clone)]
pub struct LabelFont {
    font: FontArc,
    scale: PxScale,
}

impl fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelFont")
            .field("scale", &self.scale.y)
            .finish_non_exhaustive()
    }
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("read label font {}", path.display()))?;
        Self::from_bytes(data).with_context(|| format!("load label font {}", path.display()))
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let font = FontArc::try_from_vec(data).map_err(|e| anyhow!("{}", e))?;
        Ok(Self {
            font,
            scale: PxScale::from(LABEL_FONT_SIZE),
        })
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Capture sequence number assigned by the source.
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Wrap packed RGB24 pixels. The buffer length must match `width * height * 3`.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> usize {
        RGB_CHANNELS
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB24 pixel data, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Draw an outline around a detection. Boxes are clamped to the frame; boxes that
    /// collapse to nothing after clamping are skipped.
    pub fn annotate(&mut self, detection: &Detection) {
        let (w, h) = (self.width() as i32, self.height() as i32);
        if w == 0 || h == 0 {
            return;
        }
        let bbox = detection.bbox;
        let x_min = bbox.x1.clamp(0, w - 1);
        let y_min = bbox.y1.clamp(0, h - 1);
        let x_max = bbox.x2.clamp(0, w - 1);
        let y_max = bbox.y2.clamp(0, h - 1);
        if x_min >= x_max || y_min >= y_max {
            return;
        }

        for inset in 0..ANNOTATION_THICKNESS as i32 {
            let width = x_max - x_min + 1 - 2 * inset;
            let height = y_max - y_min + 1 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(x_min + inset, y_min + inset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(&mut self.image, rect, ANNOTATION_COLOR);
        }
    }

    /// Write `label confidence` just above the detection box, or inside its top edge
    /// when the box touches the top of the frame.
    pub fn caption(&mut self, detection: &Detection, font: &LabelFont) {
        let (w, h) = (self.width() as i32, self.height() as i32);
        if w == 0 || h == 0 {
            return;
        }
        let x = detection.bbox.x1.clamp(0, w - 1);
        let y = (detection.bbox.y1 - font.scale.y.ceil() as i32 - ANNOTATION_THICKNESS as i32)
            .clamp(0, h - 1);
        draw_text_mut(
            &mut self.image,
            ANNOTATION_COLOR,
            x,
            y,
            font.scale,
            &font.font,
            &label_text(detection),
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn person(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            label: "person".to_string(),
            confidence: 0.9,
            bbox: BoundingBox { x1, y1, x2, y2 },
        }
    }

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2, 1).is_ok());
        let err = Frame::from_rgb(vec![0u8; 11], 2, 2, 1).unwrap_err();
        assert!(format!("{err}").contains("mismatch"));
    }

    #[test]
    fn annotate_draws_outline_only() {
        let mut frame = Frame::new(RgbImage::new(32, 32), 1);
        frame.annotate(&person(4, 4, 20, 20));

        assert_eq!(*frame.image().get_pixel(4, 4), ANNOTATION_COLOR);
        assert_eq!(*frame.image().get_pixel(5, 12), ANNOTATION_COLOR);
        assert_eq!(*frame.image().get_pixel(20, 20), ANNOTATION_COLOR);
        // interior stays untouched
        assert_eq!(*frame.image().get_pixel(12, 12), Rgb([0, 0, 0]));
    }

    #[test]
    fn annotate_clamps_out_of_bounds_boxes() {
        let mut frame = Frame::new(RgbImage::new(16, 16), 1);
        frame.annotate(&person(-10, -10, 100, 100));
        assert_eq!(*frame.image().get_pixel(0, 0), ANNOTATION_COLOR);
        assert_eq!(*frame.image().get_pixel(15, 15), ANNOTATION_COLOR);
    }

    #[test]
    fn caption_text_has_two_decimals() {
        let mut detection = person(0, 0, 4, 4);
        detection.confidence = 0.904;
        assert_eq!(label_text(&detection), "person 0.90");
    }

    #[test]
    fn label_font_rejects_missing_and_invalid_files() {
        let missing = std::env::temp_dir().join("presence-relay-missing-font.ttf");
        let err = LabelFont::load(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("read label font"));

        assert!(LabelFont::from_bytes(b"not a font".to_vec()).is_err());
    }

    #[test]
    fn annotate_skips_degenerate_boxes() {
        let mut frame = Frame::new(RgbImage::new(16, 16), 1);
        frame.annotate(&person(8, 8, 8, 12));
        assert!(frame.pixels().iter().all(|&p| p == 0));
    }
}
