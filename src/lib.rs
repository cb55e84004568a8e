//! Presence relay
//!
//! Watches a camera, runs an object detector on every frame and relays two
//! rate-limited streams to a remote consumer over one persistent connection:
//!
//! - detection events (`{tipo, confianza, timestamp}`), at most one per detection
//!   interval while a tracked label is in view;
//! - preview frames (`{image}`, base64 JPEG), at most one per frame interval.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (`stub://` synthetic camera, V4L2 devices)
//! - `detect`: detector backends (stub, tract YOLOv8) and YOLO decoding
//! - `gate`: per-stream minimum-interval throttle
//! - `encode`: JPEG + base64 preview encoding
//! - `events`: wire payloads
//! - `transport`: Socket.IO, MQTT and dry-run connections
//! - `monitor`: the loop and its lifecycle
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod encode;
pub mod events;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod monitor;
pub mod transport;
pub mod ui;

pub use config::MonitorConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend};
pub use encode::FrameEncoder;
pub use events::{DetectionEvent, FrameMessage};
pub use frame::{Frame, LabelFont};
pub use gate::{DualRateGate, GateState};
pub use ingest::FrameSource;
pub use monitor::{
    Clock, Monitor, MonitorSettings, MonitorState, RunSummary, StartupError, StopSignal,
    SystemClock,
};
pub use transport::{Connection, Endpoint, Transport};
