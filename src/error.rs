use std::path::PathBuf;

use thiserror::Error;

/// Domain failures that callers need to tell apart.
///
/// Everything else travels as a plain `anyhow::Error`. Use
/// `err.downcast_ref::<PipelineError>()` to classify.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ROI configuration for {event} not found at {}", path.display())]
    ConfigMissing { event: &'static str, path: PathBuf },

    #[error("invalid ROI configuration {}: {reason}", path.display())]
    InvalidRoiConfig { path: PathBuf, reason: String },

    #[error("unknown event type code {0}")]
    UnknownEventType(i64),

    #[error("unknown application mode code {0}")]
    UnknownMode(i64),

    #[error("control key '{0}' is not set")]
    ControlKeyMissing(&'static str),

    #[error("classifier holds {loaded} regions but {requested} was requested")]
    EventMismatch {
        loaded: &'static str,
        requested: &'static str,
    },

    #[error("control key '{key}' holds non-numeric value '{value}'")]
    InvalidValue { key: String, value: String },
}

impl PipelineError {
    /// True for values the control surface wrote that the producer can ride out
    /// by keeping its last observed state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::UnknownEventType(_)
                | PipelineError::UnknownMode(_)
                | PipelineError::InvalidValue { .. }
        )
    }
}
