//! evento - ROI event analytics producer
//!
//! This daemon:
//! 1. Captures frames from the configured video feed
//! 2. Polls the shared control plane (mode, event type) every frame
//! 3. In configuring mode publishes the raw frame for the ROI editor
//! 4. In streaming mode detects, classifies against the event's ROIs and
//!    appends the annotated frame and per-region counts to the frame log
//!
//! Settings come from `EVENTO_CONFIG` / `EVENTO_*` and are overridden by flags.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use evento::classify::render::load_font;
use evento::detect::{build_detector, DetectorKind};
use evento::{
    bootstrap, open_source, Orchestrator, PipelineContext, PipelineSettings, ProducerConfig,
    RoiConfigStore, ShutdownSignal, SqliteControlPlane, SqliteFrameLog, StopReason,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Detector model location (file or directory).
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Directory holding the per-event ROI documents.
    #[arg(long)]
    app_config_dir: Option<PathBuf>,
    /// Video file, image directory, rtsp:// URL or stub:// source.
    #[arg(long)]
    video_feed: Option<String>,
    /// Detector run mode forwarded to the backend.
    #[arg(long)]
    run_mode: Option<String>,
    /// Ask the detector backend to use a GPU.
    #[arg(long)]
    use_gpu: bool,
    /// Write every annotated frame to evento_debug.jpg and log counts.
    #[arg(long)]
    local_debug: bool,
    /// Detection confidence threshold.
    #[arg(long)]
    threshold: Option<f32>,
    #[arg(long, value_enum)]
    detector: Option<DetectorKind>,
    /// SQLite file shared with the control surface.
    #[arg(long)]
    db_path: Option<String>,
    /// Frame log stream name.
    #[arg(long)]
    stream: Option<String>,
    /// Maximum number of retained frame log records.
    #[arg(long)]
    log_capacity: Option<usize>,
    /// TrueType font for region labels. Without one only shapes are drawn.
    #[arg(long)]
    font: Option<PathBuf>,
}

impl Args {
    fn apply(self, cfg: &mut ProducerConfig) {
        if let Some(dir) = self.model_dir {
            cfg.detector.model_dir = dir;
        }
        if let Some(dir) = self.app_config_dir {
            cfg.app_config_dir = dir;
        }
        if let Some(feed) = self.video_feed {
            cfg.video_feed = feed;
        }
        if let Some(run_mode) = self.run_mode {
            cfg.detector.run_mode = run_mode;
        }
        if self.use_gpu {
            cfg.detector.use_gpu = true;
        }
        if self.local_debug {
            cfg.local_debug = true;
        }
        if let Some(threshold) = self.threshold {
            cfg.classify.threshold = threshold;
        }
        if let Some(kind) = self.detector {
            cfg.detector.kind = kind;
        }
        if let Some(db_path) = self.db_path {
            cfg.db_path = db_path;
        }
        if let Some(stream) = self.stream {
            cfg.stream = stream;
        }
        if let Some(capacity) = self.log_capacity {
            cfg.log_capacity = capacity;
        }
        if let Some(font) = self.font {
            cfg.font_path = Some(font);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ProducerConfig::load()?;
    args.apply(&mut cfg);
    cfg.validate()?;

    log::info!("evento {} starting", env!("CARGO_PKG_VERSION"));
    for (name, value) in cfg.summary() {
        log::info!("{}: {}", name, value);
    }

    let mut control = SqliteControlPlane::open(&cfg.db_path)?;
    let mut frame_log = SqliteFrameLog::open(&cfg.db_path, &cfg.stream, cfg.log_capacity)?;
    bootstrap(&mut control, &mut frame_log, cfg.jpeg_quality)?;

    let font = match cfg.font_path.as_deref() {
        Some(path) => Some(load_font(path)?),
        None => {
            log::warn!("no font configured; region labels will not be drawn");
            None
        }
    };

    let detector = build_detector(cfg.detector.kind, &cfg.detector_options())?;
    let source = open_source(&cfg.video_feed)?;
    let roi_store = RoiConfigStore::new(&cfg.app_config_dir);
    let context = PipelineContext::new(Box::new(control), roi_store, font)?;

    let mut orchestrator = Orchestrator::new(
        context,
        source,
        detector,
        Box::new(frame_log),
        PipelineSettings::from(&cfg),
    );

    let shutdown = ShutdownSignal::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, finishing current frame...");
        handler.trigger();
    })
    .context("failed to install Ctrl-C handler")?;

    let summary = orchestrator.run(&shutdown)?;
    if summary.reason == StopReason::CaptureFailed {
        return Err(anyhow!(
            "capture from {} failed after {} frames",
            cfg.video_feed,
            summary.frames_captured
        ));
    }
    Ok(())
}
