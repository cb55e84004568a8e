//! Frame ingestion sources.
//!
//! Sources produce RGB `Frame`s for the monitor loop:
//! - `stub://` synthetic camera (demos and tests)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Opening a source can fail fatally. After that, a failed `read` only means the
//! frame is unavailable; callers skip it and try again.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

use crate::config::CameraSettings;
use crate::frame::Frame;

/// Device prefix that selects the synthetic camera.
pub const STUB_PREFIX: &str = "stub://";

/// A camera the monitor can pull frames from.
pub trait FrameSource {
    /// Device description for logs.
    fn name(&self) -> &str;

    /// Capture the next frame. Errors are transient.
    fn read(&mut self) -> Result<Frame>;

    /// Release the device. Called once when the loop stops.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Device path for the configured camera: the explicit device, else `/dev/video{index}`.
pub fn device_path(settings: &CameraSettings) -> String {
    match &settings.device {
        Some(device) => device.clone(),
        None => format!("/dev/video{}", settings.index),
    }
}

/// Whether the configured camera is the `stub://` synthetic one.
pub fn is_synthetic(settings: &CameraSettings) -> bool {
    device_path(settings).starts_with(STUB_PREFIX)
}

/// Open the configured camera.
pub fn open_camera(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let device = device_path(settings);
    if is_synthetic(settings) {
        let camera = SyntheticCamera::new(&device, settings.width, settings.height)?;
        log::info!(
            "camera {} opened (synthetic, {}x{})",
            device,
            settings.width,
            settings.height
        );
        return Ok(Box::new(camera));
    }
    open_device(settings, device)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(settings: &CameraSettings, device: String) -> Result<Box<dyn FrameSource>> {
    let source = V4l2Source::open(v4l2::V4l2Config {
        device,
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(_settings: &CameraSettings, device: String) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "camera {} requires the ingest-v4l2 feature (use {} for a synthetic camera)",
        device,
        STUB_PREFIX
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_prefers_explicit_device() {
        let mut settings = CameraSettings::default();
        settings.index = 2;
        assert_eq!(device_path(&settings), "/dev/video2");

        settings.device = Some("stub://lobby".to_string());
        assert_eq!(device_path(&settings), "stub://lobby");
        assert!(is_synthetic(&settings));
    }

    #[test]
    fn stub_camera_opens_with_configured_size() {
        let settings = CameraSettings {
            device: Some("stub://test".to_string()),
            width: 160,
            height: 120,
            ..CameraSettings::default()
        };
        let mut camera = open_camera(&settings).unwrap();
        let frame = camera.read().unwrap();
        assert_eq!((frame.width(), frame.height()), (160, 120));
        camera.release().unwrap();
    }
}
