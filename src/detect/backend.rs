use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Any object-detection model can sit behind this trait. Backends receive the frame
/// read-only and return fresh detections; nothing is kept between calls except
/// backend-internal model state.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations must return only detections with
    /// `confidence >= confidence_threshold` (see `retain_confident`).
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once at startup.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
