//! Builds the stage graph and runs each stage as its own task.
//!
//! Stages are connected by bounded frame queues; every stage also has a
//! small control channel that a biased select observes ahead of data, so an
//! interrupt or shutdown never waits behind queued frames.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use voxline_foundation::{PipelineError, SessionConfig, SessionError};
use voxline_services::{ReplyGenerator, Role, SpeechToText, TextToSpeech};
use voxline_vad::VadEngine;

use crate::frame::{
    AudioFrame, ControlKind, Direction, Frame, FramePayload, SequenceAllocator, TranscriptFrame,
};

use super::generation::{GenerationControl, Interrupter};
use super::stage::{ControlMsg, FrameSender, PipelineEvent, Stage, StageContext};
use super::stages::{ContextAggregator, GenerateStage, SttStage, TtsStage, TurnDetectorStage};
use super::topology::Topology;

const CONTROL_QUEUE_CAPACITY: usize = 8;
const EVENT_QUEUE_CAPACITY: usize = 64;
const TAP_QUEUE_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The external service adapters a pipeline is built around. The cascaded
/// topology needs all of them; the native topology needs only the generator
/// (a speech-to-speech backend) and the turn detector.
pub struct PipelineServices {
    pub stt: Option<Box<dyn SpeechToText>>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub tts: Option<Arc<dyn TextToSpeech>>,
    pub vad: Box<dyn VadEngine>,
}

/// Session-facing handle to a running pipeline.
pub struct PipelineHandle {
    ingress: mpsc::Sender<Frame>,
    context_tx: mpsc::Sender<Frame>,
    context_ctrl_tx: mpsc::Sender<ControlMsg>,
    control_txs: Vec<mpsc::Sender<ControlMsg>>,
    interrupter: Arc<Interrupter>,
    control: Arc<GenerationControl>,
    seq: Arc<SequenceAllocator>,
    tap_tx: broadcast::Sender<Frame>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Push one frame of caller audio into the head of the pipeline,
    /// mirroring it to the tap. Blocks when the first queue is full; that
    /// backpressure is the only flow control on the inbound path.
    pub async fn enqueue_audio(&self, audio: AudioFrame) -> Result<(), SessionError> {
        let frame = Frame {
            seq: self.seq.next(Direction::Inbound),
            generation: self.control.current(),
            payload: FramePayload::Audio(audio),
        };
        let _ = self.tap_tx.send(frame.clone());
        self.ingress
            .send(frame)
            .await
            .map_err(|_| SessionError::Pipeline(PipelineError::QueueClosed { stage: "ingress" }))
    }

    /// Emit a control frame: mirrored to the tap (where the recorder reacts
    /// to start/stop markers) and sent through the stage chain, which
    /// forwards it untouched.
    pub async fn send_control(&self, kind: ControlKind) -> Result<(), SessionError> {
        let frame = Frame {
            seq: self.seq.next(Direction::Inbound),
            generation: self.control.current(),
            payload: FramePayload::Control(kind),
        };
        let _ = self.tap_tx.send(frame.clone());
        self.ingress
            .send(frame)
            .await
            .map_err(|_| SessionError::Pipeline(PipelineError::QueueClosed { stage: "ingress" }))
    }

    /// Inject a synthetic system turn so the agent speaks without waiting
    /// for the caller.
    pub async fn kickoff(&self, instruction: &str) -> Result<(), SessionError> {
        let frame = Frame {
            seq: self.seq.next(Direction::Inbound),
            generation: self.control.current(),
            payload: FramePayload::Transcript(TranscriptFrame {
                speaker: Role::System,
                text: instruction.to_string(),
                is_final: true,
            }),
        };
        self.context_tx
            .send(frame)
            .await
            .map_err(|_| SessionError::Pipeline(PipelineError::QueueClosed { stage: "context" }))
    }

    /// Cancel any in-flight generation and flush its frames everywhere.
    pub async fn cancel(&self) -> u64 {
        self.interrupter.interrupt().await
    }

    /// Ask the context aggregator to re-emit its last snapshot (one retry
    /// after a generation died mid-reply).
    pub async fn replay_context(&self) {
        let _ = self.context_ctrl_tx.send(ControlMsg::Replay).await;
    }

    pub fn current_generation(&self) -> u64 {
        self.control.current()
    }

    pub fn generation_control(&self) -> Arc<GenerationControl> {
        self.control.clone()
    }

    pub fn subscribe_tap(&self) -> broadcast::Receiver<Frame> {
        self.tap_tx.subscribe()
    }

    /// Orderly teardown: every stage gets a shutdown message and a grace
    /// period to flush, then stragglers are aborted.
    pub async fn stop(mut self) {
        for tx in &self.control_txs {
            let _ = tx.send(ControlMsg::Shutdown).await;
        }
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!("stage did not shut down in time, aborting");
                task.abort();
            }
        }
    }
}

/// Assemble and start a pipeline. Returns the handle, the event stream for
/// the session task, and the egress queue of frames leaving the last stage.
pub fn build(
    config: &SessionConfig,
    topology: Topology,
    services: PipelineServices,
) -> Result<(PipelineHandle, mpsc::Receiver<PipelineEvent>, mpsc::Receiver<Frame>), SessionError> {
    let PipelineServices {
        stt,
        generator,
        tts,
        vad,
    } = services;

    if topology.has_stt() && stt.is_none() {
        return Err(SessionError::Config(
            "cascaded topology requires a speech-to-text adapter".into(),
        ));
    }
    if topology.has_tts() && tts.is_none() {
        return Err(SessionError::Config(
            "cascaded topology requires a text-to-speech adapter".into(),
        ));
    }

    let control = Arc::new(GenerationControl::new());
    let seq = Arc::new(SequenceAllocator::new());
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (tap_tx, _) = broadcast::channel(TAP_QUEUE_CAPACITY);
    let (output_tx, output_rx) = mpsc::channel(config.queue_capacity);

    let stage_count = if topology.has_stt() { 5 } else { 3 };
    let context_index = if topology.has_stt() { 2 } else { 1 };

    let mut data_txs = Vec::with_capacity(stage_count);
    let mut data_rxs = Vec::with_capacity(stage_count);
    let mut ctrl_txs = Vec::with_capacity(stage_count);
    let mut ctrl_rxs = Vec::with_capacity(stage_count);
    for _ in 0..stage_count {
        let (dtx, drx) = mpsc::channel(config.queue_capacity);
        data_txs.push(dtx);
        data_rxs.push(drx);
        let (ctx, crx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        ctrl_txs.push(ctx);
        ctrl_rxs.push(crx);
    }

    let interrupter = Arc::new(Interrupter::new(
        control.clone(),
        ctrl_txs.clone(),
        events_tx.clone(),
    ));
    let feedback_tx = data_txs[context_index].clone();
    let deadline = config.service_deadline();

    let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(stage_count);
    stages.push(Box::new(TurnDetectorStage::new(vad, interrupter.clone())));
    if let Some(stt) = stt.filter(|_| topology.has_stt()) {
        stages.push(Box::new(SttStage::new(stt, deadline)));
    }
    stages.push(Box::new(ContextAggregator::new(
        &config.system_instruction,
        topology.context_trigger(),
    )));
    stages.push(Box::new(GenerateStage::new(
        generator,
        deadline,
        feedback_tx,
    )));
    if let Some(tts) = tts.filter(|_| topology.has_tts()) {
        stages.push(Box::new(TtsStage::new(tts, deadline)));
    }
    debug_assert_eq!(stages.len(), stage_count);

    // Only the last stage mirrors its output to the tap; inbound audio is
    // tapped once at the ingress, so intermediate pass-through must not
    // duplicate frames into the recording.
    let (silent_tap, _) = broadcast::channel(1);
    let mut downstreams: Vec<mpsc::Sender<Frame>> = data_txs[1..].to_vec();
    downstreams.push(output_tx);

    let mut tasks = Vec::with_capacity(stage_count);
    for (i, (((stage, data_rx), ctrl_rx), downstream)) in stages
        .into_iter()
        .zip(data_rxs)
        .zip(ctrl_rxs)
        .zip(downstreams)
        .enumerate()
    {
        let tap = if i == stage_count - 1 {
            tap_tx.clone()
        } else {
            silent_tap.clone()
        };
        let ctx = StageContext::new(
            FrameSender::new(stage.name(), downstream, tap),
            events_tx.clone(),
            control.clone(),
            seq.clone(),
        );
        tasks.push(spawn_stage(stage, data_rx, ctrl_rx, ctx));
    }

    let handle = PipelineHandle {
        ingress: data_txs[0].clone(),
        context_tx: data_txs[context_index].clone(),
        context_ctrl_tx: ctrl_txs[context_index].clone(),
        control_txs: ctrl_txs,
        interrupter,
        control,
        seq,
        tap_tx,
        tasks,
    };
    Ok((handle, events_rx, output_rx))
}

fn spawn_stage(
    mut stage: Box<dyn Stage>,
    mut data_rx: mpsc::Receiver<Frame>,
    mut ctrl_rx: mpsc::Receiver<ControlMsg>,
    mut ctx: StageContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = stage.name();
        loop {
            tokio::select! {
                biased;
                msg = ctrl_rx.recv() => match msg {
                    Some(ControlMsg::Interrupt { generation }) => {
                        // Frames queued ahead of the interrupt: stale
                        // generated output is discarded, everything else
                        // (caller audio, turn events) still gets processed.
                        let mut downstream_closed = false;
                        while let Ok(frame) = data_rx.try_recv() {
                            if frame.is_cancellable() && frame.generation < generation {
                                continue;
                            }
                            if let Err(error) = stage.process(frame, &mut ctx).await {
                                if matches!(error, PipelineError::QueueClosed { .. }) {
                                    downstream_closed = true;
                                    break;
                                }
                                report(name, error, &ctx).await;
                            }
                        }
                        stage.on_interrupt(generation).await;
                        if downstream_closed {
                            break;
                        }
                    }
                    Some(ControlMsg::Replay) => stage.on_replay(&mut ctx).await,
                    Some(ControlMsg::Shutdown) | None => {
                        stage.on_shutdown(&mut ctx).await;
                        break;
                    }
                },
                frame = data_rx.recv() => match frame {
                    Some(frame) => {
                        if frame.is_cancellable() && frame.generation < ctx.control.current() {
                            tracing::trace!(stage = name, seq = frame.seq, "dropping stale frame");
                            continue;
                        }
                        if let Err(error) = stage.process(frame, &mut ctx).await {
                            if matches!(error, PipelineError::QueueClosed { .. }) {
                                tracing::debug!(stage = name, "downstream closed, stopping");
                                break;
                            }
                            report(name, error, &ctx).await;
                        }
                    }
                    None => {
                        stage.on_shutdown(&mut ctx).await;
                        break;
                    }
                },
            }
        }
        tracing::debug!(stage = name, "stage task exited");
    })
}

/// A stage error never crashes the pipeline; the session task decides
/// between retry and teardown.
async fn report(name: &'static str, error: PipelineError, ctx: &StageContext) {
    let generation = ctx.control.current();
    tracing::warn!(stage = name, %error, generation, "stage error");
    ctx.emit(PipelineEvent::StageError {
        stage: name,
        error,
        generation,
    })
    .await;
}
