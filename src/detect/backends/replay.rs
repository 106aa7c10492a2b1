use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::detect::backend::Detector;
use crate::detect::result::Detection;

/// Replays recorded detections, one JSON array per line and one line per frame.
///
/// ```text
/// [{"class_id":2,"score":0.91,"xmin":10,"ymin":10,"xmax":50,"ymax":50}]
/// []
/// ```
///
/// Once every line has been used the detector keeps returning no detections.
pub struct ReplayDetector {
    path: PathBuf,
    frames: Vec<Vec<Detection>>,
    cursor: usize,
    exhausted_logged: bool,
}

impl ReplayDetector {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        let detector = Self::from_lines(&raw)
            .with_context(|| format!("invalid replay file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            ..detector
        })
    }

    pub fn from_lines(raw: &str) -> Result<Self> {
        let mut frames = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                frames.push(Vec::new());
                continue;
            }
            let detections: Vec<Detection> = serde_json::from_str(line)
                .map_err(|e| anyhow!("line {}: {}", index + 1, e))?;
            frames.push(detections);
        }
        Ok(Self {
            path: PathBuf::new(),
            frames,
            cursor: 0,
            exhausted_logged: false,
        })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len().saturating_sub(self.cursor)
    }
}

impl Detector for ReplayDetector {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, _frame: &RgbImage, threshold: f32) -> Result<Vec<Detection>> {
        let Some(frame) = self.frames.get(self.cursor) else {
            if !self.exhausted_logged {
                log::warn!(
                    "replay detector exhausted after {} frames ({})",
                    self.frames.len(),
                    self.path.display()
                );
                self.exhausted_logged = true;
            }
            return Ok(Vec::new());
        };
        self.cursor += 1;
        Ok(frame
            .iter()
            .filter(|det| det.score > threshold)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_lines_in_order_then_runs_dry() {
        let raw = r#"[{"class_id":2,"score":0.9,"xmin":10,"ymin":10,"xmax":50,"ymax":50},{"class_id":0,"score":0.3,"xmin":0,"ymin":0,"xmax":5,"ymax":5}]

[{"class_id":0,"score":0.8,"xmin":1,"ymin":1,"xmax":2,"ymax":2}]"#;
        let mut detector = ReplayDetector::from_lines(raw).unwrap();
        let frame = RgbImage::new(8, 8);
        assert_eq!(detector.remaining(), 3);

        let first = detector.detect(&frame, 0.5).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].class_id, 2);

        assert!(detector.detect(&frame, 0.5).unwrap().is_empty());
        assert_eq!(detector.detect(&frame, 0.5).unwrap()[0].class_id, 0);
        assert!(detector.detect(&frame, 0.5).unwrap().is_empty());
        assert_eq!(detector.remaining(), 0);
    }

    #[test]
    fn scores_at_threshold_are_dropped() {
        let raw = r#"[{"class_id":2,"score":0.5,"xmin":1,"ymin":1,"xmax":2,"ymax":2},{"class_id":2,"score":0.51,"xmin":1,"ymin":1,"xmax":2,"ymax":2}]"#;
        let mut detector = ReplayDetector::from_lines(raw).unwrap();
        let kept = detector.detect(&RgbImage::new(4, 4), 0.5).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.51);
    }

    #[test]
    fn malformed_line_is_reported() {
        let err = ReplayDetector::from_lines("[]\n{not json").err().unwrap();
        assert!(err.to_string().contains("line 2"));
    }
}
