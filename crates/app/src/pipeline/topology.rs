use crate::pipeline::stages::context::ContextTrigger;

/// Which optional stages the pipeline carries. Lifecycle and interruption
/// logic are identical for both; the topology only changes the stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// STT -> LLM -> TTS as three distinct stages.
    Cascaded,
    /// One speech-to-speech stage consumes audio and produces audio.
    Native,
}

impl Topology {
    pub fn has_stt(&self) -> bool {
        matches!(self, Topology::Cascaded)
    }

    pub fn has_tts(&self) -> bool {
        matches!(self, Topology::Cascaded)
    }

    /// What tells the context aggregator a user utterance is complete: a
    /// final transcript in the cascaded topology, the bare speech-stopped
    /// boundary in the native one.
    pub fn context_trigger(&self) -> ContextTrigger {
        match self {
            Topology::Cascaded => ContextTrigger::FinalTranscript,
            Topology::Native => ContextTrigger::SpeechStopped,
        }
    }
}
