#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{self, DecodeParams, DEFAULT_NMS_THRESHOLD};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8 ONNX models.
///
/// Loads a local model file once and runs inference on resized RGB frames. The model
/// input is square (`input_size` x `input_size`); frames are stretched to fit and boxes
/// are scaled back to frame pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    nms_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Override the default NMS IoU threshold.
    pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let shape = view.shape().to_vec();
        let (rows, candidates) = match shape.as_slice() {
            [1, rows, candidates] => (*rows, *candidates),
            other => return Err(anyhow!("unexpected YOLO output shape {:?}", other)),
        };
        if rows <= 4 {
            return Err(anyhow!("YOLO output has no class rows ({} rows)", rows));
        }
        let values: Vec<f32> = view.iter().copied().collect();

        let params = DecodeParams {
            num_classes: rows - 4,
            num_candidates: candidates,
            confidence_threshold,
            nms_threshold: self.nms_threshold,
            scale_x: frame.width() as f32 / self.input_size as f32,
            scale_y: frame.height() as f32 / self.input_size as f32,
            frame_width: frame.width(),
            frame_height: frame.height(),
        };
        Ok(yolo::decode(&values, &params))
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::new(image::RgbImage::new(side, side), 0);
        self.detect(&blank, 1.0).map(|_| ())
    }
}
