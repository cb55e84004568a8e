use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::FrameSource;
use crate::frame::Frame;

/// Frames per subject cycle.
const CYCLE: u64 = 60;

/// Subject is in view for cycle positions `ENTER..LEAVE`.
const ENTER: u64 = 20;
const LEAVE: u64 = 50;

/// Background values stay below this, well under the stub detector's floor.
const BACKGROUND_SPAN: u64 = 200;

/// Deterministic `stub://` camera.
///
/// Renders a shifting gradient background. For 30 frames out of every 60 a
/// pure-white subject walks across the scene, which the stub detector reports
/// as a person.
#[derive(Debug)]
pub struct SyntheticCamera {
    device: String,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(device: &str, width: u32, height: u32) -> Result<Self> {
        if width < 8 || height < 8 {
            return Err(anyhow!(
                "synthetic camera needs at least 8x8 pixels, got {}x{}",
                width,
                height
            ));
        }
        Ok(Self {
            device: device.to_string(),
            width,
            height,
            frame_count: 0,
        })
    }

    /// Whether frame number `count` shows the subject.
    pub fn subject_visible(count: u64) -> bool {
        (ENTER..LEAVE).contains(&(count % CYCLE))
    }

    fn render(&self) -> RgbImage {
        let n = self.frame_count;
        let mut image = RgbImage::from_fn(self.width, self.height, |x, y| {
            let i = (u64::from(y) * u64::from(self.width) + u64::from(x)) * 3;
            let shade = |c: u64| ((i + c + n) % BACKGROUND_SPAN) as u8;
            Rgb([shade(0), shade(1), shade(2)])
        });

        if Self::subject_visible(n) {
            let subject_w = (self.width / 5).max(4);
            let subject_h = (self.height / 2).max(4);
            let travel = self.width - subject_w;
            let step = (n % CYCLE) - ENTER;
            let x0 = (u64::from(travel) * step / (LEAVE - ENTER - 1)) as u32;
            let y0 = (self.height - subject_h) / 2;
            for y in y0..y0 + subject_h {
                for x in x0..x0 + subject_w {
                    image.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticCamera {
    fn name(&self) -> &str {
        &self.device
    }

    fn read(&mut self) -> Result<Frame> {
        let frame = Frame::new(self.render(), self.frame_count);
        self.frame_count += 1;
        Ok(frame)
    }

    fn release(&mut self) -> Result<()> {
        log::info!(
            "camera {} released after {} frames (synthetic)",
            self.device,
            self.frame_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorBackend, StubBackend};

    #[test]
    fn frames_are_sequenced() {
        let mut camera = SyntheticCamera::new("stub://test", 64, 48).unwrap();
        let a = camera.read().unwrap();
        let b = camera.read().unwrap();
        assert_eq!((a.sequence(), b.sequence()), (0, 1));
        assert_ne!(a.pixels(), b.pixels());
    }

    #[test]
    fn subject_is_visible_half_the_cycle() {
        let visible = (0..CYCLE).filter(|&n| SyntheticCamera::subject_visible(n)).count();
        assert_eq!(visible, 30);
        assert!(!SyntheticCamera::subject_visible(0));
        assert!(SyntheticCamera::subject_visible(ENTER));
        assert!(SyntheticCamera::subject_visible(CYCLE + LEAVE - 1));
    }

    #[test]
    fn stub_detector_sees_subject_only_when_visible() {
        let mut camera = SyntheticCamera::new("stub://test", 80, 60).unwrap();
        let mut detector = StubBackend::new();
        for n in 0..CYCLE {
            let frame = camera.read().unwrap();
            let detections = detector.detect(&frame, 0.5).unwrap();
            assert_eq!(
                detections.len(),
                usize::from(SyntheticCamera::subject_visible(n)),
                "frame {}",
                n
            );
        }
    }

    #[test]
    fn rejects_tiny_frames() {
        assert!(SyntheticCamera::new("stub://test", 4, 4).is_err());
    }
}
