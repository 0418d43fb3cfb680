//! Turn-detection stage: lossless audio pass-through plus speech boundary
//! events, and the trigger point for barge-in interruption.

use std::sync::Arc;

use async_trait::async_trait;

use voxline_foundation::PipelineError;
use voxline_vad::{TurnEvent, VadEngine};

use crate::frame::{Direction, Frame, FramePayload};
use crate::pipeline::generation::Interrupter;
use crate::pipeline::stage::{Stage, StageContext};

pub struct TurnDetectorStage {
    engine: Box<dyn VadEngine>,
    interrupter: Arc<Interrupter>,
}

impl TurnDetectorStage {
    pub fn new(engine: Box<dyn VadEngine>, interrupter: Arc<Interrupter>) -> Self {
        Self {
            engine,
            interrupter,
        }
    }

    async fn emit_event(
        &mut self,
        event: TurnEvent,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        if matches!(event, TurnEvent::SpeechStarted { .. }) && ctx.control.is_active() {
            tracing::info!("caller barge-in, cancelling active generation");
            self.interrupter.interrupt().await;
        }
        let frame = Frame {
            seq: ctx.seq.next(Direction::Inbound),
            generation: ctx.control.current(),
            payload: FramePayload::Turn(event),
        };
        ctx.send(frame).await
    }
}

#[async_trait]
impl Stage for TurnDetectorStage {
    fn name(&self) -> &'static str {
        "turn-detector"
    }

    async fn process(
        &mut self,
        frame: Frame,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        match &frame.payload {
            FramePayload::Audio(audio) if audio.direction == Direction::Inbound => {
                if let Some(event) = self.engine.process(&audio.samples) {
                    // Boundary event first, so downstream sees the turn edge
                    // before the audio that completed it.
                    self.emit_event(event, ctx).await?;
                }
                // Pass-through: every inbound sample continues downstream
                // unchanged and in order.
                ctx.send(frame).await
            }
            _ => ctx.send(frame).await,
        }
    }

    async fn on_shutdown(&mut self, ctx: &mut StageContext) {
        // Close an open speech segment so STT can still finalize it.
        if let Some(event) = self.engine.finish() {
            let _ = self.emit_event(event, ctx).await;
        }
    }
}
