//! Evento - ROI event analytics
//!
//! This crate implements the producer side of the Evento video analytics
//! pipeline and the shared state it exchanges with an independent control
//! surface.
//!
//! # Architecture
//!
//! - `roi`: per-event ROI polygon sets (load, reload, edit)
//! - `classify`: region membership, alert policy and overlay rendering
//! - `control`: shared key/value control state (mode, event type, raw frames)
//! - `storage`: capacity-bounded frame log consumed by viewers
//! - `pipeline`: the capture -> detect -> classify -> publish loop
//! - `detect`, `ingest`: pluggable detector and capture collaborators
//!
//! The producer and the control surface never share memory. They meet only
//! in the control plane and the frame log, both of which are backed by a
//! SQLite file in deployments.

use serde::{Deserialize, Serialize};

pub mod classify;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod roi;
pub mod storage;

pub use classify::{ClassificationResult, ClassifyParams, RegionCounts, RoiClassifier, TaggedDetection};
pub use config::ProducerConfig;
pub use control::{
    bootstrap, ControlPlane, ControlState, InMemoryControlPlane, SqliteControlPlane,
};
pub use detect::{Detection, Detector, ReplayDetector, StubDetector};
pub use error::PipelineError;
pub use frame::{decode_frame, encode_frame};
pub use ingest::{open_source, FrameSource, ImageSequenceSource, SyntheticSource};
pub use pipeline::{
    Orchestrator, PipelineContext, PipelineSettings, RunSummary, ShutdownSignal, StopReason, Tick,
};
pub use roi::{EventConfig, RoiConfigStore, RoiRegion, RoiSlot};
pub use storage::{FrameLog, FrameRecord, InMemoryFrameLog, SqliteFrameLog};

// -------------------- Event Types --------------------

/// Analysis mode selected by the operator. Each has its own class filter and
/// alerting policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    EventStat,
    AlertStranger,
    MonitorVehicle,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::EventStat,
        EventType::AlertStranger,
        EventType::MonitorVehicle,
    ];

    /// Decode the integer stored in the control plane.
    ///
    /// Unknown codes are rejected; there is no default handler.
    pub fn from_code(code: i64) -> Result<Self, PipelineError> {
        match code {
            0 => Ok(EventType::EventStat),
            1 => Ok(EventType::AlertStranger),
            2 => Ok(EventType::MonitorVehicle),
            other => Err(PipelineError::UnknownEventType(other)),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            EventType::EventStat => 0,
            EventType::AlertStranger => 1,
            EventType::MonitorVehicle => 2,
        }
    }

    /// Display name. Doubles as the ROI document stem and the raw-frame key.
    pub fn name(self) -> &'static str {
        match self {
            EventType::EventStat => "EventStat",
            EventType::AlertStranger => "AlertStranger",
            EventType::MonitorVehicle => "MonitorVehicle",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// -------------------- Application Mode --------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum AppMode {
    #[default]
    Unset,
    Configuring,
    Streaming,
}

impl AppMode {
    pub fn from_code(code: i64) -> Result<Self, PipelineError> {
        match code {
            0 => Ok(AppMode::Unset),
            1 => Ok(AppMode::Configuring),
            2 => Ok(AppMode::Streaming),
            other => Err(PipelineError::UnknownMode(other)),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            AppMode::Unset => 0,
            AppMode::Configuring => 1,
            AppMode::Streaming => 2,
        }
    }

    /// Only `Configuring` suspends detection; `Unset` streams.
    pub fn suspends_detection(self) -> bool {
        matches!(self, AppMode::Configuring)
    }
}

impl std::fmt::Display for AppMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AppMode::Unset => "unset",
            AppMode::Configuring => "configuring",
            AppMode::Streaming => "streaming",
        };
        f.write_str(name)
    }
}
