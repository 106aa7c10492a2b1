use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::detect::backends::{ReplayDetector, StubDetector};
use crate::detect::result::Detection;

/// Object detector collaborator.
///
/// Detection runs synchronously on the producer's critical path. Errors are
/// not retried: the orchestrator treats any error as fatal.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect objects scoring strictly above `threshold`.
    ///
    /// Boxes are returned in the pixel space of `frame`.
    fn detect(&mut self, frame: &RgbImage, threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// No detections (ROI configuration and plumbing checks).
    Stub,
    /// Detections replayed from a JSON-lines file.
    Replay,
    /// ONNX model through tract (feature: backend-tract).
    Tract,
}

impl std::str::FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "replay" => Ok(DetectorKind::Replay),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!("unknown detector '{}'", other)),
        }
    }
}

/// Settings forwarded to whichever backend is selected.
#[derive(Clone, Debug)]
pub struct DetectorOptions {
    /// Model location. For `replay` this is the JSON-lines file (or a directory
    /// holding `detections.jsonl`).
    pub model_dir: PathBuf,
    pub run_mode: String,
    pub use_gpu: bool,
    /// Model input size (width, height) for backends that need a fixed shape.
    pub model_input: (u32, u32),
}

pub fn build_detector(kind: DetectorKind, options: &DetectorOptions) -> Result<Box<dyn Detector>> {
    let mut detector: Box<dyn Detector> = match kind {
        DetectorKind::Stub => Box::new(StubDetector::new()),
        DetectorKind::Replay => {
            let path = if options.model_dir.is_dir() {
                options.model_dir.join("detections.jsonl")
            } else {
                options.model_dir.clone()
            };
            Box::new(ReplayDetector::open(path)?)
        }
        #[cfg(feature = "backend-tract")]
        DetectorKind::Tract => Box::new(crate::detect::backends::TractDetector::new(
            options.model_dir.join("model.onnx"),
            options.model_input.0,
            options.model_input.1,
        )?),
        #[cfg(not(feature = "backend-tract"))]
        DetectorKind::Tract => {
            return Err(anyhow!("tract detector requires the backend-tract feature"));
        }
    };

    if options.use_gpu {
        log::warn!(
            "detector {}: GPU execution is not available, running on CPU",
            detector.name()
        );
    }
    let run_mode = options.run_mode.to_ascii_lowercase();
    if run_mode != "fluid" && run_mode != "fp32" {
        log::warn!(
            "detector {}: run mode '{}' not supported, using fp32",
            detector.name(),
            options.run_mode
        );
    }

    detector.warm_up()?;
    Ok(detector)
}
