//! The producer loop.
//!
//! Each `tick` is one step of a two-state machine driven by the control plane:
//!
//! - configuring: the current raw frame is published under the active
//!   event's key and held; no detection runs and no new frame is captured
//!   until the mode changes.
//! - streaming (and unset): capture, detect, classify, then append the
//!   annotated frame and its per-region counts to the frame log.
//!
//! The control state is polled on every tick, before anything else touches
//! the frame. Any change of mode or event type reloads the event's regions
//! from disk exactly once.

use ab_glyph::FontArc;
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classify::{ClassificationResult, ClassifyParams, RoiClassifier};
use crate::config::ProducerConfig;
use crate::control::{ControlPlane, ControlState};
use crate::detect::{Detection, Detector};
use crate::error::PipelineError;
use crate::frame::{encode_frame, encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::ingest::FrameSource;
use crate::roi::RoiConfigStore;
use crate::storage::FrameLog;
use crate::EventType;

const DEBUG_FRAME_NAME: &str = "evento_debug.jpg";

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub classify: ClassifyParams,
    pub jpeg_quality: u8,
    pub poll_backoff_min: Duration,
    pub poll_backoff_max: Duration,
    pub local_debug: bool,
    pub debug_dir: PathBuf,
    pub health_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            classify: ClassifyParams::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            poll_backoff_min: Duration::from_millis(10),
            poll_backoff_max: Duration::from_millis(200),
            local_debug: false,
            debug_dir: PathBuf::from("."),
            health_interval: Duration::from_secs(5),
        }
    }
}

impl From<&ProducerConfig> for PipelineSettings {
    fn from(cfg: &ProducerConfig) -> Self {
        Self {
            classify: cfg.classify,
            jpeg_quality: cfg.jpeg_quality,
            poll_backoff_min: cfg.poll_backoff_min,
            poll_backoff_max: cfg.poll_backoff_max,
            local_debug: cfg.local_debug,
            debug_dir: cfg.debug_dir.clone(),
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Context
// ----------------------------------------------------------------------------

/// Everything that persists between ticks: the control-plane handle, the
/// classifier (loaded regions plus blink phase) and the last observed state.
pub struct PipelineContext {
    control: Box<dyn ControlPlane>,
    roi_store: RoiConfigStore,
    classifier: RoiClassifier,
    observed: ControlState,
    display_key: &'static str,
}

impl PipelineContext {
    /// Read the control plane once and load the selected event's regions.
    ///
    /// There is no earlier state to fall back to, so unknown or malformed
    /// values are fatal here. A missing ROI document is fatal here, as on
    /// every later reload.
    pub fn new(
        control: Box<dyn ControlPlane>,
        roi_store: RoiConfigStore,
        font: Option<FontArc>,
    ) -> Result<Self> {
        let observed = ControlState {
            mode: control.read_mode().context("cannot start without a valid mode")?,
            event_type: control
                .read_event_type()
                .context("cannot start without a valid event type")?,
        };
        let config = roi_store.load(observed.event_type)?;
        log::info!(
            "loaded {} regions ({} active) from {}",
            observed.event_type,
            config.active_regions().count(),
            roi_store.path_for(observed.event_type).display()
        );

        let classifier = match font {
            Some(font) => RoiClassifier::new(config).with_font(font),
            None => RoiClassifier::new(config),
        };

        Ok(Self {
            control,
            roi_store,
            classifier,
            observed,
            display_key: observed.event_type.name(),
        })
    }

    pub fn observed(&self) -> ControlState {
        self.observed
    }

    /// Control-plane key the raw frame is published under.
    pub fn display_key(&self) -> &'static str {
        self.display_key
    }

    pub fn classifier(&self) -> &RoiClassifier {
        &self.classifier
    }

    pub fn control(&self) -> &dyn ControlPlane {
        self.control.as_ref()
    }

    /// Poll the control plane. Returns true when the regions were reloaded.
    ///
    /// Each key is polled on its own, so a bad value in one key never hides
    /// a change of the other.
    pub fn sync(&mut self) -> Result<bool> {
        let mode = recoverable(self.control.read_mode())?;
        let event_type = recoverable(self.control.read_event_type())?;
        let polled = ControlState {
            mode: mode.unwrap_or(self.observed.mode),
            event_type: event_type.unwrap_or(self.observed.event_type),
        };
        if polled == self.observed {
            return Ok(false);
        }

        if polled.mode != self.observed.mode {
            log::info!("mode changed: {} -> {}", self.observed.mode, polled.mode);
        }
        if polled.event_type != self.observed.event_type {
            log::info!(
                "event type changed: {} -> {}",
                self.observed.event_type,
                polled.event_type
            );
        }

        let config = self.roi_store.load(polled.event_type)?;
        log::info!(
            "reloaded {} regions ({} active)",
            polled.event_type,
            config.active_regions().count()
        );
        self.classifier.replace_config(config);
        self.display_key = polled.event_type.name();
        self.observed = polled;
        Ok(true)
    }

    fn publish_raw(&mut self, event_type: EventType, frame: &RgbImage, quality: u8) -> Result<()> {
        let encoded = encode_frame(frame, quality)?;
        self.control.publish_raw_frame(event_type, &encoded)
    }

    fn classify(
        &mut self,
        frame: &RgbImage,
        detections: &[Detection],
        params: &ClassifyParams,
    ) -> Result<ClassificationResult> {
        let event_type = self.observed.event_type;
        self.classifier
            .classify(detections, Some(frame), event_type, params)
    }
}

/// Recoverable control values are logged and yield `None`.
fn recoverable<T>(read: Result<T>) -> Result<Option<T>> {
    match read {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            let reason = err
                .downcast_ref::<PipelineError>()
                .filter(|typed| typed.is_recoverable())
                .map(|typed| typed.to_string());
            match reason {
                Some(reason) => {
                    log::warn!("ignoring control value: {}", reason);
                    Ok(None)
                }
                None => Err(err),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Shutdown and backoff
// ----------------------------------------------------------------------------

/// Cooperative stop flag. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Doubling delay between `min` and `max`.
#[derive(Clone, Debug)]
struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self { min, max, next: min }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).clamp(self.min, self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.min;
    }
}

// ----------------------------------------------------------------------------
// Orchestrator
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    CaptureFailed,
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::EndOfStream => "end of stream",
            StopReason::CaptureFailed => "capture failed",
            StopReason::Shutdown => "shutdown requested",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Raw frame published; detection suspended.
    Configuring,
    Published { sequence: u64 },
    Stopped(StopReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub frames_captured: u64,
    pub frames_published: u64,
    pub configuring_ticks: u64,
    pub reloads: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct RunStats {
    frames_captured: u64,
    frames_published: u64,
    configuring_ticks: u64,
    reloads: u64,
}

pub struct Orchestrator {
    context: PipelineContext,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    log: Box<dyn FrameLog>,
    settings: PipelineSettings,
    held_frame: Option<RgbImage>,
    stats: RunStats,
    last_health_log: Instant,
}

impl Orchestrator {
    pub fn new(
        context: PipelineContext,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        log: Box<dyn FrameLog>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            context,
            source,
            detector,
            log,
            settings,
            held_frame: None,
            stats: RunStats::default(),
            last_health_log: Instant::now(),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn frame_log(&self) -> &dyn FrameLog {
        self.log.as_ref()
    }

    /// One step of the state machine.
    ///
    /// Detector, classifier, codec and storage errors are returned as errors
    /// and end the run. Capture problems end it through `Tick::Stopped`.
    pub fn tick(&mut self) -> Result<Tick> {
        let frame = match self.held_frame.take() {
            Some(frame) => frame,
            None => match self.source.next_frame() {
                Ok(Some(frame)) => {
                    self.stats.frames_captured += 1;
                    frame
                }
                Ok(None) => return Ok(Tick::Stopped(StopReason::EndOfStream)),
                Err(err) => {
                    log::error!("capture from {} failed: {:#}", self.source.describe(), err);
                    return Ok(Tick::Stopped(StopReason::CaptureFailed));
                }
            },
        };

        if self.context.sync()? {
            self.stats.reloads += 1;
        }
        let state = self.context.observed();
        self.context
            .publish_raw(state.event_type, &frame, self.settings.jpeg_quality)?;

        if state.mode.suspends_detection() {
            self.held_frame = Some(frame);
            self.stats.configuring_ticks += 1;
            self.log_health();
            return Ok(Tick::Configuring);
        }

        let detections = self
            .detector
            .detect(&frame, self.settings.classify.threshold)
            .with_context(|| format!("detector {} failed", self.detector.name()))?;
        let result = self
            .context
            .classify(&frame, &detections, &self.settings.classify)?;
        let annotated = result.annotated_frame.as_ref().unwrap_or(&frame);

        let metadata = result.counts.to_json()?;
        let image = encode_frame(annotated, self.settings.jpeg_quality)?;
        let sequence = self.log.append(&metadata, &image)?;
        self.stats.frames_published += 1;

        log::debug!("published #{} {}", sequence, metadata);
        if self.settings.local_debug {
            self.write_debug_frame(annotated, &metadata)?;
        }
        self.log_health();
        Ok(Tick::Published { sequence })
    }

    /// Tick until the source ends, capture fails or `shutdown` fires.
    ///
    /// The tick in progress always completes. The frame log is flushed on
    /// every exit path, including fatal errors.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> Result<RunSummary> {
        log::info!(
            "producer running: source={} detector={} mode={} event={}",
            self.source.describe(),
            self.detector.name(),
            self.context.observed().mode,
            self.context.observed().event_type
        );

        let outcome = self.run_until_stopped(shutdown);
        let flushed = self.log.flush().context("failed to flush frame log");
        let reason = outcome?;
        flushed?;

        let summary = self.summary(reason);
        log::info!(
            "producer stopped ({}): captured={} published={} configuring_ticks={} reloads={}",
            summary.reason,
            summary.frames_captured,
            summary.frames_published,
            summary.configuring_ticks,
            summary.reloads
        );
        Ok(summary)
    }

    pub fn summary(&self, reason: StopReason) -> RunSummary {
        RunSummary {
            reason,
            frames_captured: self.stats.frames_captured,
            frames_published: self.stats.frames_published,
            configuring_ticks: self.stats.configuring_ticks,
            reloads: self.stats.reloads,
        }
    }

    fn run_until_stopped(&mut self, shutdown: &ShutdownSignal) -> Result<StopReason> {
        let mut backoff = Backoff::new(
            self.settings.poll_backoff_min,
            self.settings.poll_backoff_max,
        );
        loop {
            if shutdown.is_triggered() {
                return Ok(StopReason::Shutdown);
            }
            match self.tick()? {
                Tick::Configuring => std::thread::sleep(backoff.next_delay()),
                Tick::Published { .. } => backoff.reset(),
                Tick::Stopped(reason) => return Ok(reason),
            }
        }
    }

    fn write_debug_frame(&self, annotated: &RgbImage, metadata: &str) -> Result<()> {
        let path = self.settings.debug_dir.join(DEBUG_FRAME_NAME);
        let bytes = encode_jpeg(annotated, self.settings.jpeg_quality)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write debug frame {}", path.display()))?;
        log::info!("{} counts {}", self.context.observed().event_type, metadata);
        Ok(())
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < self.settings.health_interval {
            return;
        }
        log::info!(
            "health: source={} captured={} published={} configuring_ticks={} mode={} event={}",
            self.source.describe(),
            self.stats.frames_captured,
            self.stats.frames_published,
            self.stats.configuring_ticks,
            self.context.observed().mode,
            self.context.observed().event_type
        );
        self.last_health_log = Instant::now();
    }
}
