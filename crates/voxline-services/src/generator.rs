use crate::types::{AudioChunk, ContextSnapshot, ReplyChunk};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxline_foundation::ServiceError;

/// Reply generation adapter (language model or native speech-to-speech).
///
/// `generate` returns a bounded channel of reply chunks terminated by
/// [`ReplyChunk::Done`]. Implementations must check `cancel` between chunks
/// and stop emitting as soon as it fires, discarding anything buffered.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        snapshot: ContextSnapshot,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ReplyChunk>, ServiceError>;

    /// Native (speech-to-speech) backends receive the caller's audio
    /// directly. Cascaded backends ignore it.
    async fn push_audio(&self, chunk: AudioChunk) -> Result<(), ServiceError> {
        let _ = chunk;
        Ok(())
    }
}
