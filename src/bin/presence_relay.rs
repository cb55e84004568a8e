//! presence_relay - stream person detections and a low-rate preview to a dashboard.
//!
//! Configuration comes from the file named by `--config` / `PRESENCE_CONFIG`, then
//! `PRESENCE_*` environment variables, then the flags below. Ctrl-C stops the loop
//! after the current frame; the camera is released and the connection closed
//! before exit.
//!
//! Exit codes: 0 clean stop, 1 configuration, 2 camera, 3 transport, 4 detector
//! (including the stub detector paired with a real camera), 5 loop failure after
//! a successful start.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use presence_relay::config::MonitorConfig;
use presence_relay::detect::DetectorKind;
use presence_relay::ui::{Ui, UiMode};
use presence_relay::monitor::RUNTIME_FAILURE_EXIT_CODE;
use presence_relay::{Monitor, StartupError, StopSignal, SystemClock};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect people on a camera and relay events and preview frames"
)]
struct Args {
    /// Config file (TOML, or JSON when it ends in .json).
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Camera index, opened as /dev/video{index}.
    #[arg(long)]
    camera_index: Option<u32>,

    /// Camera device path; `stub://<name>` selects the synthetic camera.
    #[arg(long)]
    camera_device: Option<String>,

    /// Consumer endpoint (http/https/ws/wss Socket.IO, mqtt/mqtts, or log://).
    #[arg(long)]
    endpoint: Option<String>,

    /// Minimum detection confidence, inclusive.
    #[arg(long)]
    confidence_threshold: Option<f32>,

    /// Comma-separated labels that produce detection events.
    #[arg(long, value_delimiter = ',')]
    tracked_labels: Option<Vec<String>>,

    /// Minimum seconds between detection events.
    #[arg(long)]
    detection_interval: Option<f64>,

    /// Minimum seconds between preview frames.
    #[arg(long)]
    frame_interval: Option<f64>,

    /// Detector backend (stub|tract).
    #[arg(long)]
    detector: Option<DetectorKind>,

    /// ONNX model for the tract backend.
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Stop after this many frames (0 = until interrupted).
    #[arg(long)]
    max_frames: Option<u64>,

    /// Do not draw detection boxes on preview frames.
    #[arg(long)]
    no_annotate: bool,

    /// TrueType font for captions above detection boxes.
    #[arg(long)]
    label_font: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

impl Args {
    fn apply(self, config: &mut MonitorConfig) -> Result<()> {
        if let Some(index) = self.camera_index {
            config.camera.index = index;
        }
        if let Some(device) = self.camera_device {
            config.camera.device = Some(device);
        }
        if let Some(endpoint) = self.endpoint {
            config.transport.endpoint = endpoint;
        }
        if let Some(threshold) = self.confidence_threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(labels) = self.tracked_labels {
            config.tracked_labels = labels;
        }
        if let Some(secs) = self.detection_interval {
            config.detection_interval = seconds("--detection-interval", secs)?;
        }
        if let Some(secs) = self.frame_interval {
            config.frame_interval = seconds("--frame-interval", secs)?;
        }
        if let Some(kind) = self.detector {
            config.detector.backend = kind;
        }
        if let Some(path) = self.model_path {
            config.detector.model_path = Some(path);
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
        if self.no_annotate {
            config.annotate = false;
        }
        if let Some(path) = self.label_font {
            config.label_font = Some(path);
        }
        config.validate()
    }
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds", flag))
}

fn load_config(args: Args) -> Result<MonitorConfig> {
    let mut config = MonitorConfig::load_from(args.config.as_deref())?;
    args.apply(&mut config)?;
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::new(args.ui, is_tty, !stdout_is_tty);

    let config = match load_config(args) {
        Ok(config) => config,
        Err(cause) => return fail(StartupError::Config { cause }),
    };

    let stop = StopSignal::new();
    if let Err(e) = stop.install_ctrlc() {
        log::warn!("{:#}; Ctrl-C will terminate without cleanup", e);
    }

    let mut monitor = match Monitor::start(&config, stop, SystemClock, &ui) {
        Ok(monitor) => monitor,
        Err(err) => return fail(err),
    };

    match monitor.run() {
        Ok(summary) => {
            ui.notice(&format!(
                "resources released and disconnected ({} frames, {} detection events, {} preview frames)",
                summary.frames_read, summary.detection_events, summary.frame_events
            ));
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(RUNTIME_FAILURE_EXIT_CODE)
        }
    }
}

fn fail(err: StartupError) -> ExitCode {
    log::error!("{}", err);
    ExitCode::from(err.exit_code())
}
