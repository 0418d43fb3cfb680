use crate::types::TranscriptEvent;
use async_trait::async_trait;
use voxline_foundation::ServiceError;

/// Streaming speech-to-text adapter.
///
/// Audio is pushed frame by frame while the caller is speaking; interim
/// results may come back on any push. `finalize_utterance` closes the
/// current utterance and returns its single final transcript, if the
/// backend recognized anything.
#[async_trait]
pub trait SpeechToText: Send {
    async fn push_audio(
        &mut self,
        samples: &[i16],
        sample_rate: u32,
    ) -> Result<Vec<TranscriptEvent>, ServiceError>;

    async fn finalize_utterance(&mut self) -> Result<Option<TranscriptEvent>, ServiceError>;
}
