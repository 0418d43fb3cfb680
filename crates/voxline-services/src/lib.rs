//! Adapter interfaces for the external speech and language services.
//!
//! The pipeline treats STT, reply generation, and TTS as opaque collaborators
//! behind these narrow traits. Concrete backends live outside this workspace;
//! tests use scripted implementations.

pub mod generator;
pub mod retry;
pub mod stt;
pub mod tts;
pub mod types;

pub use generator::ReplyGenerator;
pub use retry::{with_deadline, with_retry};
pub use stt::SpeechToText;
pub use tts::TextToSpeech;
pub use types::{
    AudioChunk, ContextSnapshot, ConversationTurn, ReplyChunk, Role, TranscriptEvent,
};
