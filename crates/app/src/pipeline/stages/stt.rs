//! Speech-to-text stage (cascaded topology only). Buffers nothing itself:
//! audio is pushed straight to the adapter while an utterance is open, and
//! the utterance is finalized on the speech-stopped boundary.

use std::time::Duration;

use async_trait::async_trait;

use voxline_foundation::{PipelineError, ServiceError};
use voxline_services::{with_deadline, Role, SpeechToText, TranscriptEvent};
use voxline_vad::TurnEvent;

use crate::frame::{Direction, Frame, FramePayload, TranscriptFrame};
use crate::pipeline::stage::{Stage, StageContext};

pub struct SttStage {
    stt: Box<dyn SpeechToText>,
    deadline: Duration,
    in_utterance: bool,
}

impl SttStage {
    pub fn new(stt: Box<dyn SpeechToText>, deadline: Duration) -> Self {
        Self {
            stt,
            deadline,
            in_utterance: false,
        }
    }

    /// Push with the stage-level retry contract: one retry, same input.
    async fn push_with_retry(
        &mut self,
        samples: &[i16],
        sample_rate: u32,
    ) -> Result<Vec<TranscriptEvent>, ServiceError> {
        match with_deadline(self.deadline, self.stt.push_audio(samples, sample_rate)).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "stt push failed transiently, retrying once");
                with_deadline(self.deadline, self.stt.push_audio(samples, sample_rate)).await
            }
            other => other,
        }
    }

    async fn finalize_with_retry(&mut self) -> Result<Option<TranscriptEvent>, ServiceError> {
        match with_deadline(self.deadline, self.stt.finalize_utterance()).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "stt finalize failed transiently, retrying once");
                with_deadline(self.deadline, self.stt.finalize_utterance()).await
            }
            other => other,
        }
    }

    async fn send_transcript(
        &mut self,
        event: TranscriptEvent,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        let (text, is_final) = match event {
            TranscriptEvent::Interim { text } => (text, false),
            TranscriptEvent::Final { text } => (text, true),
        };
        if text.trim().is_empty() {
            return Ok(());
        }
        let frame = Frame {
            seq: ctx.seq.next(Direction::Inbound),
            generation: ctx.control.current(),
            payload: FramePayload::Transcript(TranscriptFrame {
                speaker: Role::User,
                text,
                is_final,
            }),
        };
        ctx.send(frame).await
    }
}

#[async_trait]
impl Stage for SttStage {
    fn name(&self) -> &'static str {
        "stt"
    }

    async fn process(
        &mut self,
        frame: Frame,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        match &frame.payload {
            FramePayload::Audio(audio) if audio.direction == Direction::Inbound => {
                if self.in_utterance {
                    let events = self
                        .push_with_retry(&audio.samples, audio.sample_rate)
                        .await
                        .map_err(|source| PipelineError::Service {
                            stage: "stt",
                            source,
                        })?;
                    // Audio continues downstream in order; transcripts
                    // interleave behind the samples that produced them.
                    ctx.send(frame).await?;
                    for event in events {
                        self.send_transcript(event, ctx).await?;
                    }
                    Ok(())
                } else {
                    ctx.send(frame).await
                }
            }
            FramePayload::Turn(TurnEvent::SpeechStarted { .. }) => {
                self.in_utterance = true;
                ctx.send(frame).await
            }
            FramePayload::Turn(TurnEvent::SpeechStopped { .. }) => {
                self.in_utterance = false;
                ctx.send(frame).await?;
                let final_event =
                    self.finalize_with_retry()
                        .await
                        .map_err(|source| PipelineError::Service {
                            stage: "stt",
                            source,
                        })?;
                if let Some(event) = final_event {
                    self.send_transcript(event, ctx).await?;
                } else {
                    tracing::debug!("utterance finalized with no recognized text");
                }
                Ok(())
            }
            _ => ctx.send(frame).await,
        }
    }
}
