//! V4L2 frame source.
//!
//! Opens a local device node (e.g. `/dev/video0`), negotiates a capture format and
//! streams frames through memory-mapped buffers. RGB3 is requested first; drivers
//! that only offer YUYV or MJPG are accepted and converted to RGB on read.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, BufferLayout, PixelFormat};
use super::FrameSource;
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. 0 keeps the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// Camera backed by a V4L2 device.
pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceState>,
    layout: BufferLayout,
    frame_count: u64,
}

impl V4l2Source {
    /// Open the device and start streaming. Fails if the device is missing or offers
    /// no supported pixel format.
    pub fn open(config: V4l2Config) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                config.device,
                format.fourcc
            )
        })?;

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    config.device,
                    err
                );
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {}, {} bytes per line)",
            config.device,
            format.width,
            format.height,
            format.fourcc,
            format.stride
        );
        Ok(Self {
            layout: BufferLayout {
                width: format.width,
                height: format.height,
                stride: format.stride,
                format: pixel_format,
            },
            config,
            state: Some(state),
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device released")?;
        let layout = self.layout;
        let rgb = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let data = if used > 0 { &buf[..used] } else { buf };
            normalize_to_rgb(data, layout)
        })?;

        let frame = Frame::from_rgb(rgb, layout.width, layout.height, self.frame_count)?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn release(&mut self) -> Result<()> {
        // dropping the stream unmaps buffers before the device closes
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
        Ok(())
    }
}
