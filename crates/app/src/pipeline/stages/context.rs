//! The context aggregator: sole owner of the conversation transcript.

use async_trait::async_trait;

use voxline_foundation::PipelineError;
use voxline_services::{ContextSnapshot, ConversationTurn, Role};
use voxline_vad::TurnEvent;

use crate::frame::{ContextFrame, Direction, Frame, FramePayload};
use crate::pipeline::stage::{Stage, StageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextTrigger {
    FinalTranscript,
    SpeechStopped,
}

/// Maintains the ordered transcript and emits a snapshot frame whenever a
/// user utterance completes. All mutation funnels through this one stage
/// task; assistant turns come back to it as transcript frames on its own
/// queue, so there is never a second writer.
pub struct ContextAggregator {
    turns: Vec<ConversationTurn>,
    trigger: ContextTrigger,
    last_snapshot: Option<ContextSnapshot>,
}

impl ContextAggregator {
    pub fn new(system_instruction: &str, trigger: ContextTrigger) -> Self {
        Self {
            turns: vec![ConversationTurn::new(Role::System, system_instruction)],
            trigger,
            last_snapshot: None,
        }
    }

    pub fn transcript(&self) -> &[ConversationTurn] {
        &self.turns
    }

    async fn emit_snapshot(&mut self, ctx: &mut StageContext) -> Result<(), PipelineError> {
        let snapshot = ContextSnapshot {
            turns: self.turns.clone(),
        };
        self.last_snapshot = Some(snapshot.clone());
        let frame = Frame {
            seq: ctx.seq.next(Direction::Inbound),
            generation: ctx.control.current(),
            payload: FramePayload::Context(ContextFrame { snapshot }),
        };
        ctx.send(frame).await
    }
}

#[async_trait]
impl Stage for ContextAggregator {
    fn name(&self) -> &'static str {
        "context"
    }

    async fn process(
        &mut self,
        frame: Frame,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        match frame.payload {
            FramePayload::Transcript(t) if t.is_final => match t.speaker {
                Role::User => {
                    tracing::info!(text = %t.text, "user turn committed");
                    self.turns.push(ConversationTurn::new(Role::User, t.text));
                    if self.trigger == ContextTrigger::FinalTranscript {
                        self.emit_snapshot(ctx).await?;
                    }
                    Ok(())
                }
                Role::System => {
                    // Kickoff path: a synthetic system turn triggers
                    // generation so the agent speaks first.
                    self.turns.push(ConversationTurn::new(Role::System, t.text));
                    self.emit_snapshot(ctx).await
                }
                Role::Assistant => {
                    tracing::info!(text = %t.text, "assistant turn committed");
                    self.turns
                        .push(ConversationTurn::new(Role::Assistant, t.text));
                    Ok(())
                }
            },
            FramePayload::Transcript(t) => {
                tracing::debug!(text = %t.text, "interim transcript");
                Ok(())
            }
            FramePayload::Turn(TurnEvent::SpeechStopped { .. })
                if self.trigger == ContextTrigger::SpeechStopped =>
            {
                self.emit_snapshot(ctx).await
            }
            FramePayload::Turn(_) => ctx.send(frame).await,
            FramePayload::Audio(_) | FramePayload::Control(_) => ctx.send(frame).await,
            FramePayload::Context(_) | FramePayload::Text(_) => Err(
                PipelineError::ProtocolViolation("context/text frame arrived upstream".into()),
            ),
        }
    }

    async fn on_replay(&mut self, ctx: &mut StageContext) {
        if let Some(snapshot) = self.last_snapshot.clone() {
            tracing::info!("replaying last context snapshot after failed generation");
            let frame = Frame {
                seq: ctx.seq.next(Direction::Inbound),
                generation: ctx.control.current(),
                payload: FramePayload::Context(ContextFrame { snapshot }),
            };
            if ctx.send(frame).await.is_err() {
                tracing::warn!("replay dropped: downstream closed");
            }
        }
    }
}
