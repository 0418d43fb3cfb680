use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub sample_rate_hz: u32,
    /// Speech onset: frame energy must exceed the noise floor by this much.
    pub onset_threshold_db: f32,
    /// Speech offset: energy below floor + offset counts as silence.
    pub offset_threshold_db: f32,
    /// EMA coefficient for the adaptive noise floor (applied during silence).
    pub floor_ema_alpha: f32,
    pub initial_floor_db: f32,
    /// Consecutive speech required before `SpeechStarted` fires.
    pub speech_debounce_ms: u32,
    /// Consecutive silence required before `SpeechStopped` fires. Kept long
    /// enough that natural mid-sentence pauses do not split an utterance.
    pub silence_debounce_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 8_000,
            onset_threshold_db: 9.0,
            offset_threshold_db: 6.0,
            floor_ema_alpha: 0.02,
            initial_floor_db: -50.0,
            speech_debounce_ms: 120,
            silence_debounce_ms: 500,
        }
    }
}
