use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::yolo::DEFAULT_NMS_THRESHOLD;
use crate::detect::DetectorKind;
use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::events::{DEFAULT_DETECTION_EVENT, DEFAULT_FRAME_EVENT};
use crate::transport::Endpoint;

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_TRACKED_LABEL: &str = "person";
const DEFAULT_DETECTION_INTERVAL_SECS: f64 = 1.0;
const DEFAULT_FRAME_INTERVAL_SECS: f64 = 0.2;
const DEFAULT_ENDPOINT: &str = "http://localhost:3000";
const DEFAULT_SOCKETIO_PATH: &str = "/api/socket";
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "presence";
const DEFAULT_MQTT_CLIENT_ID: &str = "presence-relay";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PRESENCE_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    camera_index: Option<u32>,
    camera_device: Option<String>,
    confidence_threshold: Option<f32>,
    tracked_labels: Option<Vec<String>>,
    detection_interval_seconds: Option<f64>,
    frame_interval_seconds: Option<f64>,
    endpoint: Option<String>,
    max_frames: Option<u64>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    transport: Option<TransportConfigFile>,
    events: Option<EventsConfigFile>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    nms_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TransportConfigFile {
    socketio_path: Option<String>,
    mqtt_topic_prefix: Option<String>,
    mqtt_client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsConfigFile {
    detection: Option<String>,
    frame: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    jpeg_quality: Option<u8>,
    annotate: Option<bool>,
    label_font: Option<PathBuf>,
}

/// Full runtime configuration of the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    /// Minimum detection confidence, inclusive.
    pub confidence_threshold: f32,
    /// Labels that produce detection events.
    pub tracked_labels: Vec<String>,
    pub detection_interval: Duration,
    pub frame_interval: Duration,
    pub transport: TransportSettings,
    pub events: EventNames,
    pub jpeg_quality: u8,
    /// Draw boxes around tracked detections before the preview is encoded.
    pub annotate: bool,
    /// TrueType font for `label 0.90` captions above boxes. Boxes only when unset.
    pub label_font: Option<PathBuf>,
    /// Stop after this many frames. 0 runs until interrupted.
    pub max_frames: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub index: u32,
    /// Explicit device path, overrides `index`. `stub://...` selects the synthetic camera.
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    /// 0 keeps the driver default.
    pub target_fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: 0,
            device: None,
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    /// Square model input side, in pixels.
    pub input_size: u32,
    pub nms_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DetectorKind::default(),
            model_path: None,
            input_size: DEFAULT_MODEL_INPUT_SIZE,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub endpoint: String,
    /// Socket.IO path used when the endpoint URL has none.
    pub socketio_path: String,
    pub mqtt_topic_prefix: String,
    pub mqtt_client_id: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            socketio_path: DEFAULT_SOCKETIO_PATH.to_string(),
            mqtt_topic_prefix: DEFAULT_MQTT_TOPIC_PREFIX.to_string(),
            mqtt_client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
        }
    }
}

/// Event names on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNames {
    pub detection: String,
    pub frame: String,
}

impl Default for EventNames {
    fn default() -> Self {
        Self {
            detection: DEFAULT_DETECTION_EVENT.to_string(),
            frame: DEFAULT_FRAME_EVENT.to_string(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            detector: DetectorSettings::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            tracked_labels: vec![DEFAULT_TRACKED_LABEL.to_string()],
            detection_interval: Duration::from_secs_f64(DEFAULT_DETECTION_INTERVAL_SECS),
            frame_interval: Duration::from_secs_f64(DEFAULT_FRAME_INTERVAL_SECS),
            transport: TransportSettings::default(),
            events: EventNames::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            annotate: true,
            label_font: None,
            max_frames: 0,
        }
    }
}

impl MonitorConfig {
    /// Defaults, then the file named by `PRESENCE_CONFIG`, then `PRESENCE_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let config_path = config_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty());
        Self::load_from(config_path.map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `PRESENCE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            index: file.camera_index.unwrap_or(defaults.camera.index),
            device: file.camera_device,
            width: camera_file.width.unwrap_or(defaults.camera.width),
            height: camera_file.height.unwrap_or(defaults.camera.height),
            target_fps: camera_file.target_fps.unwrap_or(defaults.camera.target_fps),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: match detector_file.backend {
                Some(name) => name.parse()?,
                None => defaults.detector.backend,
            },
            model_path: detector_file.model_path,
            input_size: detector_file
                .input_size
                .unwrap_or(defaults.detector.input_size),
            nms_threshold: detector_file
                .nms_threshold
                .unwrap_or(defaults.detector.nms_threshold),
        };

        let detection_interval = match file.detection_interval_seconds {
            Some(secs) => seconds("detection_interval_seconds", secs)?,
            None => defaults.detection_interval,
        };
        let frame_interval = match file.frame_interval_seconds {
            Some(secs) => seconds("frame_interval_seconds", secs)?,
            None => defaults.frame_interval,
        };

        let transport_file = file.transport.unwrap_or_default();
        let transport = TransportSettings {
            endpoint: file.endpoint.unwrap_or(defaults.transport.endpoint),
            socketio_path: transport_file
                .socketio_path
                .unwrap_or(defaults.transport.socketio_path),
            mqtt_topic_prefix: transport_file
                .mqtt_topic_prefix
                .unwrap_or(defaults.transport.mqtt_topic_prefix),
            mqtt_client_id: transport_file
                .mqtt_client_id
                .unwrap_or(defaults.transport.mqtt_client_id),
        };

        let events_file = file.events.unwrap_or_default();
        let events = EventNames {
            detection: events_file.detection.unwrap_or(defaults.events.detection),
            frame: events_file.frame.unwrap_or(defaults.events.frame),
        };

        let preview = file.preview.unwrap_or_default();
        Ok(Self {
            camera,
            detector,
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            tracked_labels: file.tracked_labels.unwrap_or(defaults.tracked_labels),
            detection_interval,
            frame_interval,
            transport,
            events,
            jpeg_quality: preview.jpeg_quality.unwrap_or(defaults.jpeg_quality),
            annotate: preview.annotate.unwrap_or(defaults.annotate),
            label_font: preview.label_font,
            max_frames: file.max_frames.unwrap_or(defaults.max_frames),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(index) = env_parse::<u32>("PRESENCE_CAMERA_INDEX")? {
            self.camera.index = index;
        }
        if let Some(device) = env_string("PRESENCE_CAMERA_DEVICE") {
            self.camera.device = Some(device);
        }
        if let Some(threshold) = env_parse::<f32>("PRESENCE_CONFIDENCE_THRESHOLD")? {
            self.confidence_threshold = threshold;
        }
        if let Ok(labels) = std::env::var("PRESENCE_TRACKED_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.tracked_labels = parsed;
            }
        }
        if let Some(secs) = env_parse::<f64>("PRESENCE_DETECTION_INTERVAL_SECS")? {
            self.detection_interval = seconds("PRESENCE_DETECTION_INTERVAL_SECS", secs)?;
        }
        if let Some(secs) = env_parse::<f64>("PRESENCE_FRAME_INTERVAL_SECS")? {
            self.frame_interval = seconds("PRESENCE_FRAME_INTERVAL_SECS", secs)?;
        }
        if let Some(endpoint) = env_string("PRESENCE_ENDPOINT") {
            self.transport.endpoint = endpoint;
        }
        if let Some(backend) = env_string("PRESENCE_DETECTOR") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(path) = env_string("PRESENCE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_string("PRESENCE_LABEL_FONT") {
            self.label_font = Some(PathBuf::from(path));
        }
        if let Some(max_frames) = env_parse::<u64>("PRESENCE_MAX_FRAMES")? {
            self.max_frames = max_frames;
        }
        Ok(())
    }

    /// Check value ranges and that the endpoint is usable.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.tracked_labels.iter().all(|label| label.trim().is_empty()) {
            return Err(anyhow!("tracked_labels must name at least one label"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera size must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.nms_threshold) {
            return Err(anyhow!(
                "nms_threshold must be within [0, 1], got {}",
                self.detector.nms_threshold
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if self.events.detection.trim().is_empty() || self.events.frame.trim().is_empty() {
            return Err(anyhow!("event names must not be empty"));
        }
        Endpoint::parse(&self.transport.endpoint, &self.transport.socketio_path)
            .context("invalid endpoint")?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        anyhow!(
            "{} must be a finite, non-negative number of seconds, got {}",
            name,
            secs
        )
    })
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value: {}", name, value)),
        None => Ok(None),
    }
}

pub(crate) fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
