//! Voxline: a bidirectional streaming pipeline for telephone voice agents.
//!
//! One [`session::Session`] per transport connection owns a
//! [`pipeline`] of concurrently running stages: turn detection, optional
//! speech-to-text, context aggregation, reply generation, optional
//! text-to-speech. An audio tap observes both directions and produces a
//! time-aligned recording on session end.

pub mod codec;
pub mod frame;
pub mod pipeline;
pub mod scripted;
pub mod session;
pub mod tap;
pub mod transport;
pub mod wav_sink;
