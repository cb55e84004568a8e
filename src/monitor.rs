//! The capture -> detect -> throttle -> transmit loop.
//!
//! `Monitor` owns one frame source, one detector and one connection. It walks
//! `Starting -> Running -> Stopping -> Stopped`:
//!
//! - `start` checks the preview settings and the detector/camera pairing, then
//!   acquires the camera, the detector and the connection, in that order. A failure
//!   releases whatever was already acquired and maps to a `StartupError`.
//! - `run` iterates until the stop signal is raised (checked between iterations)
//!   or the frame limit is reached.
//! - Shutdown releases the camera and disconnects exactly once, also when the
//!   loop unwinds from a panic (through `Drop`).
//!
//! Per-iteration failures (frame read, inference, encode, emit) are logged,
//! counted in `RunSummary`, and never stop the loop.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};

use crate::config::{EventNames, MonitorConfig};
use crate::detect::{self, Detection, DetectorBackend};
use crate::encode::FrameEncoder;
use crate::events::{DetectionEvent, FrameMessage};
use crate::frame::LabelFont;
use crate::gate::{DualRateGate, GateState, DETECTION_STREAM, FRAME_STREAM};
use crate::ingest::{self, FrameSource};
use crate::transport::{self, Connection};
use crate::ui::Ui;

/// Loop time between health lines.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Time source for gating and event timestamps.
pub trait Clock {
    /// Monotonic time, used by the gate.
    fn now(&self) -> Instant;

    /// Local wall-clock time, used for event timestamps.
    fn wall_clock(&self) -> DateTime<Local>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Cooperative stop flag, shared with the Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise this signal on Ctrl-C / SIGTERM. Can only be installed once per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, stopping after the current frame");
            signal.raise();
        })
        .context("install Ctrl-C handler")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Failures that prevent the loop from ever running.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {cause:#}")]
    Config { cause: anyhow::Error },
    #[error("camera unavailable: {cause:#}")]
    Camera { cause: anyhow::Error },
    #[error("detector failed to load: {cause:#}")]
    Detector { cause: anyhow::Error },
    #[error("could not connect to the consumer: {cause:#}")]
    Transport { cause: anyhow::Error },
}

/// Process exit code when the loop itself fails after a successful start.
pub const RUNTIME_FAILURE_EXIT_CODE: u8 = 5;

impl StartupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config { .. } => 1,
            StartupError::Camera { .. } => 2,
            StartupError::Transport { .. } => 3,
            StartupError::Detector { .. } => 4,
        }
    }
}

/// Loop behaviour, independent of how the components were built.
#[derive(Clone, Debug)]
pub struct MonitorSettings {
    pub confidence_threshold: f32,
    pub tracked_labels: Vec<String>,
    pub detection_interval: Duration,
    pub frame_interval: Duration,
    pub events: EventNames,
    pub jpeg_quality: u8,
    pub annotate: bool,
    pub label_font: Option<PathBuf>,
    pub max_frames: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            tracked_labels: config.tracked_labels.clone(),
            detection_interval: config.detection_interval,
            frame_interval: config.frame_interval,
            events: config.events.clone(),
            jpeg_quality: config.jpeg_quality,
            annotate: config.annotate,
            label_font: config.label_font.clone(),
            max_frames: config.max_frames,
        }
    }
}

/// Counters for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_unavailable: u64,
    pub inference_failures: u64,
    pub detection_events: u64,
    pub frame_events: u64,
    pub emit_failures: u64,
    pub encode_failures: u64,
}

/// Preview-side components. Built before any device is opened since they only
/// depend on settings.
struct Preview {
    encoder: FrameEncoder,
    label_font: Option<LabelFont>,
}

impl Preview {
    fn prepare(settings: &MonitorSettings) -> Result<Self> {
        let encoder = FrameEncoder::new(settings.jpeg_quality)?;
        let label_font = match &settings.label_font {
            Some(path) if settings.annotate => Some(LabelFont::load(path)?),
            _ => None,
        };
        Ok(Self {
            encoder,
            label_font,
        })
    }
}

pub struct Monitor<C: Clock = SystemClock> {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    connection: Connection,
    preview: Preview,
    gate: DualRateGate,
    gate_state: GateState,
    tracked: HashSet<String>,
    settings: MonitorSettings,
    stop: StopSignal,
    clock: C,
    state: MonitorState,
    summary: RunSummary,
    last_health: Option<Instant>,
    source_released: bool,
}

impl<C: Clock> Monitor<C> {
    /// Assemble a monitor from already-acquired components.
    pub fn from_parts(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        connection: Connection,
        settings: MonitorSettings,
        stop: StopSignal,
        clock: C,
    ) -> Result<Self> {
        let preview = Preview::prepare(&settings)?;
        Ok(Self::assemble(
            source, detector, connection, preview, settings, stop, clock,
        ))
    }

    fn assemble(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        connection: Connection,
        preview: Preview,
        settings: MonitorSettings,
        stop: StopSignal,
        clock: C,
    ) -> Self {
        let gate = DualRateGate::for_monitor(settings.detection_interval, settings.frame_interval);
        let tracked = settings
            .tracked_labels
            .iter()
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect();
        Self {
            source,
            detector,
            connection,
            preview,
            gate,
            gate_state: GateState::new(),
            tracked,
            settings,
            stop,
            clock,
            state: MonitorState::Starting,
            summary: RunSummary::default(),
            last_health: None,
            source_released: false,
        }
    }

    /// Open the camera, load the detector and connect, reporting each stage on `ui`.
    pub fn start(
        config: &MonitorConfig,
        stop: StopSignal,
        clock: C,
        ui: &Ui,
    ) -> std::result::Result<Self, StartupError> {
        let settings = MonitorSettings::from_config(config);
        let preview =
            Preview::prepare(&settings).map_err(|cause| StartupError::Config { cause })?;
        detect::ensure_camera_supported(&config.detector, &config.camera)
            .map_err(|cause| StartupError::Detector { cause })?;

        let mut source = staged(ui, "open camera", || ingest::open_camera(&config.camera))
            .map_err(|cause| StartupError::Camera { cause })?;

        let detector = match staged(ui, "load detector", || {
            detect::build_backend(&config.detector)
        }) {
            Ok(detector) => detector,
            Err(cause) => {
                release_quietly(source.as_mut());
                return Err(StartupError::Detector { cause });
            }
        };

        let connection = match staged(ui, "connect", || transport::connect(&config.transport)) {
            Ok(connection) => connection,
            Err(cause) => {
                release_quietly(source.as_mut());
                return Err(StartupError::Transport { cause });
            }
        };

        // Components are handed over; from here on Drop releases them.
        Ok(Self::assemble(
            source, detector, connection, preview, settings, stop, clock,
        ))
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Run until stopped, then release everything. Can be called once.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.state != MonitorState::Starting {
            return Err(anyhow!("monitor cannot run from state {:?}", self.state));
        }
        self.state = MonitorState::Running;
        log::info!(
            "monitoring {} with detector '{}' (tracking: {})",
            self.source.name(),
            self.detector.name(),
            self.settings.tracked_labels.join(", ")
        );

        while !self.should_stop() {
            self.iterate();
            self.log_health();
        }

        self.shutdown();
        Ok(self.summary)
    }

    fn should_stop(&self) -> bool {
        if self.stop.is_raised() {
            log::info!("stop requested");
            return true;
        }
        let limit = self.settings.max_frames;
        if limit > 0 && self.summary.frames_read >= limit {
            log::info!("frame limit of {} reached", limit);
            return true;
        }
        false
    }

    /// One capture -> detect -> throttle -> transmit pass.
    fn iterate(&mut self) {
        let mut frame = match self.source.read() {
            Ok(frame) => frame,
            Err(e) => {
                self.summary.frames_unavailable += 1;
                log::warn!("could not read a frame from {}: {:#}", self.source.name(), e);
                return;
            }
        };
        self.summary.frames_read += 1;

        let detections = match self
            .detector
            .detect(&frame, self.settings.confidence_threshold)
        {
            Ok(detections) => detections,
            Err(e) => {
                self.summary.inference_failures += 1;
                log::warn!("inference failed on frame #{}: {:#}", frame.sequence(), e);
                Vec::new()
            }
        };

        let tracked: Vec<&Detection> = detections
            .iter()
            .filter(|d| self.tracked.contains(&d.label))
            .collect();
        for detection in tracked {
            if self.settings.annotate {
                frame.annotate(detection);
                if let Some(font) = &self.preview.label_font {
                    frame.caption(detection, font);
                }
            }
            if !self
                .gate
                .should_emit(&mut self.gate_state, DETECTION_STREAM, self.clock.now())
            {
                continue;
            }
            let event = DetectionEvent::new(detection, self.clock.wall_clock());
            match self.connection.emit(&self.settings.events.detection, &event) {
                Ok(()) => {
                    self.summary.detection_events += 1;
                    log::info!(
                        "{} detected ({:.2}), event sent",
                        event.kind,
                        event.confidence
                    );
                }
                Err(e) => {
                    self.summary.emit_failures += 1;
                    log::warn!("{:#}", e);
                }
            }
        }

        if !self
            .gate
            .should_emit(&mut self.gate_state, FRAME_STREAM, self.clock.now())
        {
            return;
        }
        let image = match self.preview.encoder.encode(&frame) {
            Ok(image) => image,
            Err(e) => {
                self.summary.encode_failures += 1;
                log::warn!("{:#}", e);
                return;
            }
        };
        match self
            .connection
            .emit(&self.settings.events.frame, &FrameMessage { image })
        {
            Ok(()) => self.summary.frame_events += 1,
            Err(e) => {
                self.summary.emit_failures += 1;
                log::warn!("{:#}", e);
            }
        }
    }

    fn log_health(&mut self) {
        let now = self.clock.now();
        let due = match self.last_health {
            None => {
                self.last_health = Some(now);
                false
            }
            Some(last) => now.saturating_duration_since(last) >= HEALTH_INTERVAL,
        };
        if due {
            self.last_health = Some(now);
            let s = &self.summary;
            log::info!(
                "health: frames={} unavailable={} detections_sent={} frames_sent={} emit_failures={}",
                s.frames_read,
                s.frames_unavailable,
                s.detection_events,
                s.frame_events,
                s.emit_failures
            );
        }
    }

    /// Release the camera and disconnect. Runs once; later calls do nothing.
    fn shutdown(&mut self) {
        if self.state == MonitorState::Stopped {
            return;
        }
        self.state = MonitorState::Stopping;

        if !self.source_released {
            self.source_released = true;
            if let Err(e) = self.source.release() {
                log::warn!("releasing {} failed: {:#}", self.source.name(), e);
            }
        }
        if let Err(e) = self.connection.close() {
            log::warn!("{:#}", e);
        }

        self.state = MonitorState::Stopped;
        log::info!(
            "resources released and disconnected from {} ({:?})",
            self.connection.endpoint(),
            self.summary
        );
    }
}

impl<C: Clock> Drop for Monitor<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn staged<T>(ui: &Ui, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let mut stage = ui.stage(name);
    let result = f();
    if result.is_err() {
        stage.fail();
    }
    result
}

fn release_quietly(source: &mut dyn FrameSource) {
    if let Err(e) = source.release() {
        log::warn!("releasing {} failed: {:#}", source.name(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let codes = [
            StartupError::Config { cause: anyhow!("x") }.exit_code(),
            StartupError::Camera { cause: anyhow!("x") }.exit_code(),
            StartupError::Transport { cause: anyhow!("x") }.exit_code(),
            StartupError::Detector { cause: anyhow!("x") }.exit_code(),
        ];
        assert_eq!(codes, [1, 2, 3, 4]);
        assert!(!codes.contains(&RUNTIME_FAILURE_EXIT_CODE));
    }

    #[test]
    fn stop_signal_is_shared_between_clones() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_raised());
        handle.raise();
        assert!(signal.is_raised());
    }

    #[test]
    fn settings_follow_config() {
        let mut config = MonitorConfig::default();
        config.max_frames = 12;
        config.annotate = false;
        config.label_font = Some(PathBuf::from("/opt/fonts/label.ttf"));
        let settings = MonitorSettings::from_config(&config);
        assert_eq!(settings.max_frames, 12);
        assert!(!settings.annotate);
        assert_eq!(settings.label_font, config.label_font);
        assert_eq!(settings.tracked_labels, vec!["person".to_string()]);
    }

    #[test]
    fn label_font_is_only_loaded_when_annotating() {
        let mut settings = MonitorSettings::default();
        settings.label_font = Some(PathBuf::from("/nonexistent/presence-relay.ttf"));
        assert!(Preview::prepare(&settings).is_err());

        settings.annotate = false;
        let preview = Preview::prepare(&settings).expect("preview without captions");
        assert!(preview.label_font.is_none());
    }

    #[test]
    fn startup_error_message_includes_cause() {
        let err = StartupError::Camera {
            cause: anyhow!("open v4l2 device /dev/video9"),
        };
        assert_eq!(
            err.to_string(),
            "camera unavailable: open v4l2 device /dev/video9"
        );
    }
}
