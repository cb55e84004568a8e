//! Detection engine.
//!
//! A `DetectorBackend` turns a frame into labeled, confidence-scored boxes. Backends:
//! - `stub`: bright-subject detector, pairs with the `stub://` synthetic camera
//! - `tract`: YOLOv8 ONNX model run through tract (feature: backend-tract)
//!
//! Every backend applies the confidence threshold inclusively through
//! `retain_confident`. Label filtering is left to the monitor loop.

mod backend;
mod backends;
mod result;
pub mod yolo;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection};

use crate::config::{CameraSettings, DetectorSettings};
use crate::ingest;

/// Detector backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectorKind {
    #[default]
    Stub,
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" | "onnx" | "yolo" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}': expected 'stub' or 'tract'",
                other
            )),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stub => write!(f, "stub"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Keep detections whose confidence reaches the threshold (inclusive).
pub fn retain_confident(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections.retain(|d| d.confidence >= threshold);
    detections
}

/// Refuse pairings that would report made-up detections. The stub backend only
/// understands the synthetic camera's scene; on a real device every bright patch
/// would become a person.
pub fn ensure_camera_supported(
    settings: &DetectorSettings,
    camera: &CameraSettings,
) -> Result<()> {
    if settings.backend == DetectorKind::Stub && !ingest::is_synthetic(camera) {
        return Err(anyhow!(
            "the stub detector only runs against a {} camera, not {}; select the tract backend with a model path",
            ingest::STUB_PREFIX,
            ingest::device_path(camera)
        ));
    }
    Ok(())
}

/// Build and warm up the configured backend.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend {
        DetectorKind::Stub => Box::new(StubBackend::new()),
        DetectorKind::Tract => build_tract_backend(settings)?,
    };
    backend.warm_up()?;
    log::info!("detector backend '{}' ready", backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn build_tract_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("the tract backend requires a model path"))?;
    let backend = TractBackend::new(model_path, settings.input_size)?
        .with_nms_threshold(settings.nms_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_backend(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "the tract detector requires the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(confidence: f32) -> Detection {
        Detection::new("person", confidence, BoundingBox::default())
    }

    #[test]
    fn threshold_is_inclusive() {
        let kept = retain_confident(vec![det(0.50), det(0.499), det(0.9)], 0.5);
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.50, 0.9]);
    }

    #[test]
    fn detector_kind_parses_aliases() {
        assert_eq!("stub".parse::<DetectorKind>().unwrap(), DetectorKind::Stub);
        assert_eq!("ONNX".parse::<DetectorKind>().unwrap(), DetectorKind::Tract);
        assert!("darknet".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn stub_backend_is_refused_on_device_cameras() {
        let stub = DetectorSettings::default();
        let mut camera = CameraSettings::default();
        let err = ensure_camera_supported(&stub, &camera).unwrap_err();
        assert!(format!("{err}").contains("/dev/video0"));

        camera.device = Some("stub://porch".to_string());
        assert!(ensure_camera_supported(&stub, &camera).is_ok());

        let tract = DetectorSettings {
            backend: DetectorKind::Tract,
            ..DetectorSettings::default()
        };
        camera.device = Some("/dev/video2".to_string());
        assert!(ensure_camera_supported(&tract, &camera).is_ok());
    }

    #[test]
    fn stub_backend_builds_from_settings() {
        let backend = build_backend(&DetectorSettings::default()).expect("stub backend");
        assert_eq!(backend.name(), "stub");
    }
}
