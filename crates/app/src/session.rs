//! One session per call: owns the transport, the pipeline, and the tap, and
//! runs the event loop between them until someone hangs up.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use voxline_foundation::{
    PipelineError, SessionConfig, SessionError, SessionState, SessionStateMachine,
};

use crate::frame::{ControlKind, FramePayload};
use crate::pipeline::{self, PipelineEvent, PipelineServices, Topology};
use crate::tap::{spawn_tap, RecordingBuffer, RecordingData, TapCommand};
use crate::transport::{Transport, TransportEvent};

/// What the session reports to its supervisor (the binary, a call server).
#[derive(Debug)]
pub enum SessionEvent {
    Connected { stream_sid: String },
    /// Emitted exactly once during teardown, before `Closed`. `None` when no
    /// audio was captured at all.
    RecordingFinalized(Option<RecordingData>),
    Closed { reason: CloseReason },
}

#[derive(Debug, PartialEq, Eq)]
pub enum CloseReason {
    RemoteDisconnected,
    Cancelled,
    TransportError(String),
    PipelineFailure(String),
}

pub struct SessionHandle {
    events: mpsc::Receiver<SessionEvent>,
    cancel: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Ask the session to wind down. Idempotent; a second cancel is ignored.
    pub async fn cancel(&self) {
        let _ = self.cancel.send(()).await;
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

pub struct Session;

impl Session {
    /// Build the pipeline and start the session event loop as its own task.
    pub fn spawn<T: Transport + 'static>(
        config: SessionConfig,
        topology: Topology,
        services: PipelineServices,
        transport: T,
    ) -> Result<SessionHandle, SessionError> {
        let (handle, events_rx, output_rx) = pipeline::build(&config, topology, services)?;
        let (session_tx, session_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let tap_frames = handle.subscribe_tap();
        let (tap_cmd_tx, tap_cmd_rx) = mpsc::channel(4);
        let tap_task = spawn_tap(
            tap_frames,
            tap_cmd_rx,
            RecordingBuffer::new(config.audio_in_sample_rate, config.max_recording_ms),
        );

        let runner = SessionRunner {
            config,
            state: SessionStateMachine::new(),
            handle,
            events_rx,
            output_rx,
            transport,
            session_tx,
            cancel_rx,
            tap_cmd_tx,
            tap_task,
            stream_sid: None,
            started_at: None,
        };
        let join = tokio::spawn(runner.run());
        Ok(SessionHandle {
            events: session_rx,
            cancel: cancel_tx,
            join,
        })
    }
}

struct SessionRunner<T: Transport> {
    config: SessionConfig,
    state: SessionStateMachine,
    handle: pipeline::PipelineHandle,
    events_rx: mpsc::Receiver<PipelineEvent>,
    output_rx: mpsc::Receiver<crate::frame::Frame>,
    transport: T,
    session_tx: mpsc::Sender<SessionEvent>,
    cancel_rx: mpsc::Receiver<()>,
    tap_cmd_tx: mpsc::Sender<TapCommand>,
    tap_task: JoinHandle<()>,
    stream_sid: Option<String>,
    started_at: Option<Instant>,
}

impl<T: Transport> SessionRunner<T> {
    async fn run(mut self) {
        let reason = self.event_loop().await;
        self.teardown(reason).await;
    }

    async fn event_loop(&mut self) -> CloseReason {
        // One generation retry after a fatal mid-reply failure: wait out the
        // silence window, and if nothing else moved the conversation along,
        // replay the last context snapshot. A second failure ends the call.
        let mut retry_at: Option<(Instant, u64)> = None;
        let mut already_retried = false;

        loop {
            let retry_deadline = retry_at.map(|(at, _)| at);
            tokio::select! {
                biased;
                _ = self.cancel_rx.recv() => {
                    return CloseReason::Cancelled;
                }
                event = self.transport.recv() => match event {
                    Some(TransportEvent::Connected { stream_sid }) => {
                        tracing::info!(%stream_sid, "media stream connected");
                        if self.state.transition(SessionState::Active).is_err() {
                            tracing::warn!("connect event outside Connecting state, ignoring");
                            continue;
                        }
                        self.stream_sid = Some(stream_sid.clone());
                        self.started_at = Some(Instant::now());
                        if let Err(e) = self
                            .handle
                            .send_control(ControlKind::StartRecording)
                            .await
                        {
                            return CloseReason::PipelineFailure(e.to_string());
                        }
                        if let Err(e) = self.handle.kickoff(&self.config.kickoff_instruction).await {
                            return CloseReason::PipelineFailure(e.to_string());
                        }
                        let _ = self
                            .session_tx
                            .send(SessionEvent::Connected { stream_sid })
                            .await;
                    }
                    Some(TransportEvent::Media(audio)) => {
                        if self.state.current() != SessionState::Active {
                            tracing::warn!("media before connect, dropping");
                            continue;
                        }
                        if let Err(e) = self.handle.enqueue_audio(audio).await {
                            return CloseReason::PipelineFailure(e.to_string());
                        }
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        tracing::info!("remote hung up");
                        return CloseReason::RemoteDisconnected;
                    }
                },
                frame = self.output_rx.recv() => match frame {
                    Some(frame) => {
                        if frame.is_cancellable()
                            && frame.generation < self.handle.current_generation()
                        {
                            tracing::trace!(seq = frame.seq, "stale frame at egress, dropping");
                            continue;
                        }
                        if let FramePayload::Audio(audio) = &frame.payload {
                            if let Err(e) = self.transport.send(audio).await {
                                return CloseReason::TransportError(e.to_string());
                            }
                        }
                    }
                    None => {
                        return CloseReason::PipelineFailure("pipeline egress closed".into());
                    }
                },
                event = self.events_rx.recv() => match event {
                    Some(PipelineEvent::StageError { stage, error, generation }) => {
                        tracing::warn!(stage, %error, generation, "pipeline stage error");
                        if matches!(error, PipelineError::ProtocolViolation(_)) {
                            // Already logged; the offending frame was dropped.
                            continue;
                        }
                        if already_retried {
                            return CloseReason::PipelineFailure(format!(
                                "{stage} stage failed again: {error}"
                            ));
                        }
                        retry_at = Some((
                            Instant::now() + self.config.silence_timeout(),
                            generation,
                        ));
                    }
                    Some(PipelineEvent::GenerationCompleted { generation }) => {
                        tracing::debug!(generation, "generation completed");
                        retry_at = None;
                    }
                    Some(PipelineEvent::Interrupted { generation }) => {
                        tracing::debug!(generation, "generation interrupted");
                        retry_at = None;
                    }
                    None => {}
                },
                _ = sleep_until_opt(retry_deadline), if retry_deadline.is_some() => {
                    if let Some((_, failed_generation)) = retry_at.take() {
                        if self.handle.current_generation() == failed_generation
                            && !already_retried
                        {
                            tracing::info!(
                                "silence window elapsed, retrying generation once"
                            );
                            already_retried = true;
                            self.handle.replay_context().await;
                        }
                    }
                }
            }
        }
    }

    async fn teardown(self, reason: CloseReason) {
        let stream_sid = self.stream_sid.as_deref().unwrap_or("<never connected>");
        let call_ms = self
            .started_at
            .map(|at| at.elapsed().as_millis() as u64)
            .unwrap_or(0);
        tracing::info!(?reason, stream_sid, call_ms, "session teardown");
        let _ = self.state.transition(SessionState::Cancelling);
        // Stop the recorder at the moment of disconnect, before the pipeline
        // drains, so trailing generated audio is not recorded.
        let _ = self.handle.send_control(ControlKind::StopRecording).await;
        let _ = self.handle.send_control(ControlKind::EndSession).await;
        self.handle.cancel().await;
        self.handle.stop().await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let recording = if self
            .tap_cmd_tx
            .send(TapCommand::Finalize { reply: reply_tx })
            .await
            .is_ok()
        {
            reply_rx.await.unwrap_or(None)
        } else {
            None
        };
        let _ = self.tap_task.await;
        let _ = self
            .session_tx
            .send(SessionEvent::RecordingFinalized(recording))
            .await;

        let _ = self.state.transition(SessionState::Closed);
        let _ = self.session_tx.send(SessionEvent::Closed { reason }).await;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        // The branch is guarded; this arm never runs.
        None => std::future::pending().await,
    }
}
