//! Wire payloads sent to the consumer.
//!
//! Field names follow the dashboard contract: detection events carry `tipo`,
//! `confianza` and `timestamp`; preview frames carry `image`.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::detect::Detection;

/// Default event name for detection events.
pub const DEFAULT_DETECTION_EVENT: &str = "detection";

/// Default event name for preview frames.
pub const DEFAULT_FRAME_EVENT: &str = "video_frame";

/// Payload of a `detection` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    #[serde(rename = "tipo")]
    pub kind: String,
    /// Rounded to two decimals.
    #[serde(rename = "confianza")]
    pub confidence: f64,
    /// ISO-8601 local time, microsecond precision, no offset.
    pub timestamp: String,
}

impl DetectionEvent {
    pub fn new(detection: &Detection, at: DateTime<Local>) -> Self {
        Self {
            kind: detection.label.clone(),
            confidence: round_confidence(detection.confidence),
            timestamp: iso_timestamp(&at),
        }
    }
}

/// Payload of a `video_frame` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Base64-encoded JPEG.
    pub image: String,
}

pub fn round_confidence(confidence: f32) -> f64 {
    (f64::from(confidence) * 100.0).round() / 100.0
}

pub fn iso_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
