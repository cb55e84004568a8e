use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::detect::retain_confident;
use crate::frame::Frame;

/// Label reported for the bright subject.
pub const STUB_LABEL: &str = "person";

/// Channel value at or above which a pixel counts as subject.
const SUBJECT_FLOOR: u8 = 250;

/// Minimum subject pixels before anything is reported.
const MIN_SUBJECT_PIXELS: usize = 16;

/// Confidence for a subject that fills its bounding box completely.
const FULL_FILL_CONFIDENCE: f32 = 0.9;

/// Stub backend for demos and tests.
///
/// Reports one `person` detection around all near-white pixels of the frame. The
/// synthetic camera paints its subject pure white over a darker background, so the
/// two pair up without any model file.
#[derive(Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let width = frame.width() as usize;
        let mut count = 0usize;
        let (mut x_min, mut y_min) = (usize::MAX, usize::MAX);
        let (mut x_max, mut y_max) = (0usize, 0usize);

        for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
            if px.iter().all(|&c| c >= SUBJECT_FLOOR) {
                let (x, y) = (i % width, i / width);
                x_min = x_min.min(x);
                y_min = y_min.min(y);
                x_max = x_max.max(x);
                y_max = y_max.max(y);
                count += 1;
            }
        }

        if count < MIN_SUBJECT_PIXELS {
            return Ok(Vec::new());
        }

        let area = (x_max - x_min + 1) * (y_max - y_min + 1);
        let fill = count as f32 / area as f32;
        let detection = Detection::new(
            STUB_LABEL,
            FULL_FILL_CONFIDENCE * fill,
            BoundingBox {
                x1: x_min as i32,
                y1: y_min as i32,
                x2: x_max as i32,
                y2: y_max as i32,
            },
        );
        Ok(retain_confident(vec![detection], confidence_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame_with_subject(x: u32, y: u32, w: u32, h: u32) -> Frame {
        let mut image = RgbImage::from_pixel(64, 48, Rgb([40, 40, 40]));
        for yy in y..y + h {
            for xx in x..x + w {
                image.put_pixel(xx, yy, Rgb([255, 255, 255]));
            }
        }
        Frame::new(image, 1)
    }

    #[test]
    fn stub_backend_boxes_bright_subject() {
        let mut backend = StubBackend::new();
        let detections = backend
            .detect(&frame_with_subject(10, 5, 8, 12), 0.5)
            .unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.label, "person");
        assert_eq!(det.bbox, BoundingBox { x1: 10, y1: 5, x2: 17, y2: 16 });
        assert!((det.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn stub_backend_ignores_empty_scene() {
        let mut backend = StubBackend::new();
        let frame = Frame::new(RgbImage::from_pixel(64, 48, Rgb([90, 90, 90])), 1);
        assert!(backend.detect(&frame, 0.5).unwrap().is_empty());
    }

    #[test]
    fn stub_backend_applies_threshold() {
        let mut backend = StubBackend::new();
        let frame = frame_with_subject(0, 0, 8, 8);
        assert!(backend.detect(&frame, 0.95).unwrap().is_empty());
    }
}
