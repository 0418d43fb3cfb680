//! Foundation types for the Voxline call pipeline: error taxonomy, the
//! session lifecycle state machine, and session configuration.

pub mod config;
pub mod error;
pub mod state;

pub use config::SessionConfig;
pub use error::{PipelineError, ServiceError, SessionError};
pub use state::{SessionState, SessionStateMachine};
