use std::time::Duration;
use thiserror::Error;

use crate::state::SessionState;

/// Errors surfaced by external service adapters (STT, reply generation, TTS).
///
/// Transient failures (including deadline overruns) are retried once by the
/// calling stage with the same input before bubbling up. Fatal failures abort
/// the current generation but keep the session alive.
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("transient service failure: {0}")]
    Transient(String),

    #[error("fatal service failure: {0}")]
    Fatal(String),

    #[error("service call exceeded {0:?} deadline")]
    Timeout(Duration),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_) | ServiceError::Timeout(_))
    }
}

/// Stage-level errors reported to the pipeline engine. The engine never lets
/// one stage's failure crash its siblings; it forwards these to the session
/// task, which decides between retry and teardown.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("service error in {stage} stage: {source}")]
    Service {
        stage: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("{stage} stage downstream queue closed")]
    QueueClosed { stage: &'static str },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Service { stage, .. } => stage,
            PipelineError::QueueClosed { stage } => stage,
            PipelineError::ProtocolViolation(_) => "pipeline",
        }
    }
}

/// Session-terminal errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("configuration error: {0}")]
    Config(String),
}
