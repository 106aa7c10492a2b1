#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::Detection;

/// Tract-based backend for ONNX object detection.
///
/// The model takes a `[1, 3, H, W]` RGB tensor in `0..1` and yields `[N, 6]`
/// rows of `[class, score, xmin, ymin, xmax, ymax]` in model-input pixels.
/// Boxes are rescaled back to the source frame.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let resized;
        let input = if frame.width() == self.width && frame.height() == self.height {
            frame
        } else {
            resized = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            &resized
        };

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| input.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn extract_boxes(
        &self,
        outputs: TVec<TValue>,
        frame: &RgbImage,
        threshold: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let values: Vec<f32> = rows.iter().copied().collect();
        if values.len() % 6 != 0 {
            return Err(anyhow!(
                "model output has {} values, expected rows of 6",
                values.len()
            ));
        }

        let scale_x = frame.width() as f32 / self.width as f32;
        let scale_y = frame.height() as f32 / self.height as f32;

        Ok(values
            .chunks_exact(6)
            .filter(|row| row[1] > threshold)
            .map(|row| Detection {
                class_id: row[0] as i32,
                score: row[1],
                xmin: row[2] * scale_x,
                ymin: row[3] * scale_y,
                xmax: row[4] * scale_x,
                ymax: row[5] * scale_y,
            })
            .collect())
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage, threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_boxes(outputs, frame, threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.width, self.height);
        self.detect(&blank, 1.0).map(|_| ())
    }
}
