//! The stage abstraction and the plumbing every stage task shares.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use voxline_foundation::PipelineError;

use super::generation::GenerationControl;
use crate::frame::{Frame, FramePayload, SequenceAllocator};

/// Control messages delivered on a separate channel so they are observed
/// ahead of queued data frames.
#[derive(Debug)]
pub enum ControlMsg {
    Interrupt { generation: u64 },
    /// Re-emit the last context snapshot (generation retry after a fatal
    /// mid-reply error). Only the context aggregator acts on this.
    Replay,
    Shutdown,
}

/// Events the engine and its stages surface to the session task.
#[derive(Debug)]
pub enum PipelineEvent {
    StageError {
        stage: &'static str,
        error: PipelineError,
        generation: u64,
    },
    GenerationCompleted {
        generation: u64,
    },
    Interrupted {
        generation: u64,
    },
}

/// Sender half connecting a stage to the next one, mirroring audio frames to
/// the tap observers. Tap delivery never blocks; a lagging observer misses
/// frames rather than stalling the chain.
#[derive(Clone)]
pub struct FrameSender {
    name: &'static str,
    downstream: mpsc::Sender<Frame>,
    tap: broadcast::Sender<Frame>,
}

impl FrameSender {
    pub fn new(
        name: &'static str,
        downstream: mpsc::Sender<Frame>,
        tap: broadcast::Sender<Frame>,
    ) -> Self {
        Self {
            name,
            downstream,
            tap,
        }
    }

    pub async fn send(&self, frame: Frame) -> Result<(), PipelineError> {
        if matches!(frame.payload, FramePayload::Audio(_)) {
            let _ = self.tap.send(frame.clone());
        }
        self.downstream
            .send(frame)
            .await
            .map_err(|_| PipelineError::QueueClosed { stage: self.name })
    }
}

/// Handles a stage needs while processing; handed to it by its task loop.
pub struct StageContext {
    sender: FrameSender,
    events: mpsc::Sender<PipelineEvent>,
    pub control: Arc<GenerationControl>,
    pub seq: Arc<SequenceAllocator>,
}

impl StageContext {
    pub fn new(
        sender: FrameSender,
        events: mpsc::Sender<PipelineEvent>,
        control: Arc<GenerationControl>,
        seq: Arc<SequenceAllocator>,
    ) -> Self {
        Self {
            sender,
            events,
            control,
            seq,
        }
    }

    /// Push a frame to the next stage, stalling on a full queue
    /// (backpressure) rather than buffering without bound.
    pub async fn send(&self, frame: Frame) -> Result<(), PipelineError> {
        self.sender.send(frame).await
    }

    pub async fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    pub fn events_sender(&self) -> mpsc::Sender<PipelineEvent> {
        self.events.clone()
    }
}

/// One pipeline stage. Stages run as independent tasks and communicate only
/// through their queues; `process` must never block on anything but its own
/// downstream send.
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    async fn process(&mut self, frame: Frame, ctx: &mut StageContext)
        -> Result<(), PipelineError>;

    /// Called when an interrupt reaches this stage, after its queue has been
    /// purged of stale frames.
    async fn on_interrupt(&mut self, _generation: u64) {}

    async fn on_replay(&mut self, _ctx: &mut StageContext) {}

    /// Final flush before the stage task exits.
    async fn on_shutdown(&mut self, _ctx: &mut StageContext) {}
}
