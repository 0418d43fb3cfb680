use crate::types::AudioChunk;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxline_foundation::ServiceError;

/// Streaming text-to-speech adapter. Same cancellation contract as the
/// reply generator: stop within one chunk once `cancel` fires.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(
        &self,
        text: String,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<AudioChunk>, ServiceError>;
}
