#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Silence,
    Speaking,
}

/// Speech boundary events consumed by the pipeline. The state machine
/// guarantees strict alternation: every `SpeechStarted` is followed by
/// exactly one `SpeechStopped` before the next start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnEvent {
    SpeechStarted {
        timestamp_ms: u64,
        energy_db: f32,
    },
    SpeechStopped {
        timestamp_ms: u64,
        duration_ms: u64,
    },
}
