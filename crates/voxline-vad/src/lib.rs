//! Turn detection for the call pipeline.
//!
//! The engine decides per audio frame whether the caller is speaking; the
//! state machine debounces those decisions into alternating
//! `SpeechStarted` / `SpeechStopped` events. The signal processing behind
//! the speech decision is deliberately simple (energy threshold over a
//! tracked noise floor); anything smarter plugs in behind [`VadEngine`].

pub mod config;
pub mod energy;
pub mod engine;
pub mod state;
pub mod types;

pub use config::VadConfig;
pub use energy::EnergyVad;
pub use engine::VadEngine;
pub use state::TurnStateMachine;
pub use types::{TurnEvent, TurnState};
