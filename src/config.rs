use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ClassifyParams;
use crate::detect::{DetectorKind, DetectorOptions};
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::storage::DEFAULT_LOG_CAPACITY;

const DEFAULT_DB_PATH: &str = "evento.db";
const DEFAULT_APP_CONFIG_DIR: &str = "config";
const DEFAULT_MODEL_DIR: &str = "models/ppyolo";
const DEFAULT_VIDEO_FEED: &str = "demo/Input_EventSeries.mp4";
const DEFAULT_RUN_MODE: &str = "fluid";
const DEFAULT_STREAM: &str = "camera:0";
const DEFAULT_DEBUG_DIR: &str = ".";
const DEFAULT_MODEL_INPUT: u32 = 608;
const DEFAULT_BACKOFF_MIN_MS: u64 = 10;
const DEFAULT_BACKOFF_MAX_MS: u64 = 200;

#[derive(Debug, Deserialize, Default)]
struct ProducerConfigFile {
    db_path: Option<String>,
    app_config_dir: Option<PathBuf>,
    video_feed: Option<String>,
    local_debug: Option<bool>,
    debug_dir: Option<PathBuf>,
    font_path: Option<PathBuf>,
    jpeg_quality: Option<u8>,
    detector: Option<DetectorConfigFile>,
    classify: Option<ClassifyConfigFile>,
    frame_log: Option<FrameLogConfigFile>,
    poll: Option<PollConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    model_dir: Option<PathBuf>,
    run_mode: Option<String>,
    use_gpu: Option<bool>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifyConfigFile {
    threshold: Option<f32>,
    alpha: Option<f32>,
    vehicle_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameLogConfigFile {
    stream: Option<String>,
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PollConfigFile {
    backoff_min_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
}

/// Resolved producer settings.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub db_path: String,
    pub app_config_dir: PathBuf,
    pub video_feed: String,
    pub local_debug: bool,
    pub debug_dir: PathBuf,
    pub font_path: Option<PathBuf>,
    pub jpeg_quality: u8,
    pub detector: DetectorSettings,
    pub classify: ClassifyParams,
    pub stream: String,
    pub log_capacity: usize,
    pub poll_backoff_min: Duration,
    pub poll_backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_dir: PathBuf,
    pub run_mode: String,
    pub use_gpu: bool,
    pub model_input: (u32, u32),
}

impl ProducerConfig {
    /// Defaults, then the JSON file named by `EVENTO_CONFIG`, then `EVENTO_*`
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EVENTO_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ProducerConfigFile) -> Self {
        let detector_file = file.detector.unwrap_or_default();
        let classify_file = file.classify.unwrap_or_default();
        let log_file = file.frame_log.unwrap_or_default();
        let poll_file = file.poll.unwrap_or_default();
        let classify_defaults = ClassifyParams::default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            app_config_dir: file
                .app_config_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_APP_CONFIG_DIR)),
            video_feed: file
                .video_feed
                .unwrap_or_else(|| DEFAULT_VIDEO_FEED.to_string()),
            local_debug: file.local_debug.unwrap_or(false),
            debug_dir: file
                .debug_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEBUG_DIR)),
            font_path: file.font_path,
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            detector: DetectorSettings {
                kind: detector_file.kind.unwrap_or(DetectorKind::Stub),
                model_dir: detector_file
                    .model_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
                run_mode: detector_file
                    .run_mode
                    .unwrap_or_else(|| DEFAULT_RUN_MODE.to_string()),
                use_gpu: detector_file.use_gpu.unwrap_or(false),
                model_input: (
                    detector_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                    detector_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
                ),
            },
            classify: ClassifyParams {
                threshold: classify_file.threshold.unwrap_or(classify_defaults.threshold),
                alpha: classify_file.alpha.unwrap_or(classify_defaults.alpha),
                vehicle_threshold: classify_file
                    .vehicle_threshold
                    .unwrap_or(classify_defaults.vehicle_threshold),
            },
            stream: log_file.stream.unwrap_or_else(|| DEFAULT_STREAM.to_string()),
            log_capacity: log_file.capacity.unwrap_or(DEFAULT_LOG_CAPACITY),
            poll_backoff_min: Duration::from_millis(
                poll_file.backoff_min_ms.unwrap_or(DEFAULT_BACKOFF_MIN_MS),
            ),
            poll_backoff_max: Duration::from_millis(
                poll_file.backoff_max_ms.unwrap_or(DEFAULT_BACKOFF_MAX_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("EVENTO_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = non_empty_env("EVENTO_APP_CONFIG_DIR") {
            self.app_config_dir = PathBuf::from(dir);
        }
        if let Some(feed) = non_empty_env("EVENTO_VIDEO_FEED") {
            self.video_feed = feed;
        }
        if let Some(stream) = non_empty_env("EVENTO_STREAM") {
            self.stream = stream;
        }
        if let Some(threshold) = non_empty_env("EVENTO_THRESHOLD") {
            self.classify.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("EVENTO_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(capacity) = non_empty_env("EVENTO_LOG_CAPACITY") {
            self.log_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("EVENTO_LOG_CAPACITY must be a positive integer"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.classify.threshold) {
            return Err(anyhow!("threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.classify.alpha) {
            return Err(anyhow!("alpha must be within [0, 1]"));
        }
        if self.log_capacity == 0 {
            return Err(anyhow!("frame log capacity must be greater than zero"));
        }
        if self.poll_backoff_min > self.poll_backoff_max {
            return Err(anyhow!("poll backoff minimum exceeds maximum"));
        }
        if self.video_feed.trim().is_empty() {
            return Err(anyhow!("video feed must not be empty"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        Ok(())
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            model_dir: self.detector.model_dir.clone(),
            run_mode: self.detector.run_mode.clone(),
            use_gpu: self.detector.use_gpu,
            model_input: self.detector.model_input,
        }
    }

    /// Every setting as `name -> value`, sorted by name, for the startup log.
    pub fn summary(&self) -> BTreeMap<&'static str, String> {
        let mut out = BTreeMap::new();
        out.insert("alpha", self.classify.alpha.to_string());
        out.insert("app_config_dir", self.app_config_dir.display().to_string());
        out.insert("db_path", self.db_path.clone());
        out.insert("debug_dir", self.debug_dir.display().to_string());
        out.insert("detector", format!("{:?}", self.detector.kind).to_lowercase());
        out.insert(
            "font_path",
            self.font_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
        );
        out.insert("jpeg_quality", self.jpeg_quality.to_string());
        out.insert("local_debug", self.local_debug.to_string());
        out.insert("log_capacity", self.log_capacity.to_string());
        out.insert("model_dir", self.detector.model_dir.display().to_string());
        out.insert(
            "model_input",
            format!("{}x{}", self.detector.model_input.0, self.detector.model_input.1),
        );
        out.insert(
            "poll_backoff_ms",
            format!(
                "{}..{}",
                self.poll_backoff_min.as_millis(),
                self.poll_backoff_max.as_millis()
            ),
        );
        out.insert("run_mode", self.detector.run_mode.clone());
        out.insert("stream", self.stream.clone());
        out.insert("threshold", self.classify.threshold.to_string());
        out.insert("use_gpu", self.detector.use_gpu.to_string());
        out.insert("vehicle_threshold", self.classify.vehicle_threshold.to_string());
        out.insert("video_feed", self.video_feed.clone());
        out
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self::from_file(ProducerConfigFile::default())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ProducerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
