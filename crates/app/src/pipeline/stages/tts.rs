//! Text-to-speech stage (cascaded topology only). Streams synthesized PCM
//! downstream one chunk at a time; a cancellation is honored at the next
//! chunk boundary, which bounds interruption latency to one chunk.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use voxline_foundation::PipelineError;
use voxline_services::{with_deadline, with_retry, TextToSpeech};

use crate::frame::{AudioFrame, Direction, Frame, FramePayload};
use crate::pipeline::stage::{Stage, StageContext};

pub struct TtsStage {
    tts: Arc<dyn TextToSpeech>,
    deadline: Duration,
}

impl TtsStage {
    pub fn new(tts: Arc<dyn TextToSpeech>, deadline: Duration) -> Self {
        Self { tts, deadline }
    }
}

#[async_trait]
impl Stage for TtsStage {
    fn name(&self) -> &'static str {
        "tts"
    }

    async fn process(
        &mut self,
        frame: Frame,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        match frame.payload {
            FramePayload::Text(tf) => {
                let generation = frame.generation;
                let Some(token) = ctx.control.token_for(generation) else {
                    tracing::debug!(generation, "stale text frame, skipping synthesis");
                    return Ok(());
                };

                let tts = self.tts.clone();
                let deadline = self.deadline;
                let mut rx = with_retry("tts", || {
                    let tts = tts.clone();
                    let text = tf.text.clone();
                    let token = token.clone();
                    async move { with_deadline(deadline, tts.synthesize(text, token)).await }
                })
                .await
                .map_err(|source| PipelineError::Service {
                    stage: "tts",
                    source,
                })?;

                while let Some(chunk) = rx.recv().await {
                    if token.is_cancelled() {
                        tracing::debug!(generation, "synthesis cancelled mid-stream");
                        break;
                    }
                    let frame = Frame {
                        seq: ctx.seq.next(Direction::Outbound),
                        generation,
                        payload: FramePayload::Audio(AudioFrame {
                            samples: chunk.samples,
                            sample_rate: chunk.sample_rate,
                            channels: chunk.channels,
                            direction: Direction::Outbound,
                        }),
                    };
                    ctx.send(frame).await?;
                }
                Ok(())
            }
            FramePayload::Audio(ref a) if a.direction == Direction::Outbound => {
                // Native-topology audio is already speech; pass it along.
                ctx.send(frame).await
            }
            FramePayload::Control(_) => ctx.send(frame).await,
            _ => Ok(()),
        }
    }
}
