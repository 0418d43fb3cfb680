use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-session configuration. Everything here is passed explicitly to the
/// stages that need it at construction time; there is no process-global
/// settings object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sample rate of decoded caller audio (telephony is 8 kHz).
    pub audio_in_sample_rate: u32,
    /// Sample rate of agent audio handed to the transport.
    pub audio_out_sample_rate: u32,
    /// Language hint passed through to the service adapters.
    pub language: String,
    /// Voice selection passed through to the TTS / speech-to-speech adapter.
    pub voice: String,
    /// System instruction seeding the conversation transcript.
    pub system_instruction: String,
    /// Synthetic system turn injected on connect so the agent speaks first.
    pub kickoff_instruction: String,
    /// Bounded capacity of each stage's inbound frame queue.
    pub queue_capacity: usize,
    /// Deadline for one external service call; overruns are transient errors.
    pub service_deadline_ms: u64,
    /// Silence tolerated after a fatal mid-reply error before the session
    /// retries generation once more or ends the call.
    pub silence_timeout_ms: u64,
    /// Cap on buffered recording audio per channel, in milliseconds. Hitting
    /// the cap logs a warning and drops further audio; this is the explicit
    /// bound on in-memory accumulation for long calls.
    pub max_recording_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio_in_sample_rate: 8_000,
            audio_out_sample_rate: 8_000,
            language: "es".to_string(),
            voice: "sonic".to_string(),
            system_instruction: "Eres un comico que cuenta chistes cortos de humor blanco; \
                                 no expliques el chiste si no te lo piden."
                .to_string(),
            kickoff_instruction: "Presentate al usuario".to_string(),
            queue_capacity: 64,
            service_deadline_ms: 10_000,
            silence_timeout_ms: 4_000,
            max_recording_ms: 10 * 60 * 1_000,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, SessionError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| SessionError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn service_deadline(&self) -> Duration {
        Duration::from_millis(self.service_deadline_ms)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }
}
