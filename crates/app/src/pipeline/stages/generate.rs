//! Reply-generation stage. Each context frame starts a new generation,
//! implicitly cancelling the previous one; a forwarder task streams the
//! adapter's chunks downstream so the stage itself stays responsive to
//! interrupts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voxline_foundation::{PipelineError, ServiceError};
use voxline_services::{
    with_deadline, with_retry, AudioChunk, ContextSnapshot, ReplyChunk, ReplyGenerator, Role,
};

use crate::frame::{
    AudioFrame, Direction, Frame, FramePayload, SequenceAllocator, TextFrame, TranscriptFrame,
};
use crate::pipeline::generation::GenerationControl;
use crate::pipeline::stage::{FrameSender, PipelineEvent, Stage, StageContext};

pub struct GenerateStage {
    generator: Arc<dyn ReplyGenerator>,
    deadline: Duration,
    /// Direct line back into the context aggregator's queue; completed
    /// assistant text returns to the transcript through its single writer.
    feedback_tx: mpsc::Sender<Frame>,
    inflight: Option<JoinHandle<()>>,
}

impl GenerateStage {
    pub fn new(
        generator: Arc<dyn ReplyGenerator>,
        deadline: Duration,
        feedback_tx: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            generator,
            deadline,
            feedback_tx,
            inflight: None,
        }
    }

    async fn start_generation(
        &mut self,
        snapshot: ContextSnapshot,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        let (generation, token) = ctx.control.begin();
        tracing::info!(generation, turns = snapshot.turns.len(), "starting reply generation");

        let generator = self.generator.clone();
        let deadline = self.deadline;
        let rx = with_retry("llm", || {
            let generator = generator.clone();
            let snapshot = snapshot.clone();
            let token = token.clone();
            async move { with_deadline(deadline, generator.generate(snapshot, token)).await }
        })
        .await
        .map_err(|source| {
            ctx.control.finish(generation);
            PipelineError::Service {
                stage: "llm",
                source,
            }
        })?;

        let forwarder = ReplyForwarder {
            generation,
            token,
            downstream: ctx.sender(),
            feedback: self.feedback_tx.clone(),
            events: ctx.events_sender(),
            control: ctx.control.clone(),
            seq: ctx.seq.clone(),
        };
        self.inflight = Some(tokio::spawn(forwarder.run(rx)));
        Ok(())
    }

    /// Same retry contract as every adapter call: a deadline per attempt,
    /// one retry on a transient failure.
    async fn push_audio_with_retry(&self, chunk: AudioChunk) -> Result<(), ServiceError> {
        match with_deadline(self.deadline, self.generator.push_audio(chunk.clone())).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "speech backend push failed transiently, retrying once");
                with_deadline(self.deadline, self.generator.push_audio(chunk)).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn process(
        &mut self,
        frame: Frame,
        ctx: &mut StageContext,
    ) -> Result<(), PipelineError> {
        match frame.payload {
            FramePayload::Context(cf) => self.start_generation(cf.snapshot, ctx).await,
            FramePayload::Audio(audio) if audio.direction == Direction::Inbound => {
                // Native topology: caller audio feeds the speech-to-speech
                // backend. Inbound audio terminates here either way.
                let chunk = AudioChunk {
                    samples: audio.samples,
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                };
                self.push_audio_with_retry(chunk)
                    .await
                    .map_err(|source| PipelineError::Service {
                        stage: "llm",
                        source,
                    })
            }
            FramePayload::Control(_) => ctx.send(frame).await,
            // Turn events and transcripts have served their purpose upstream.
            _ => Ok(()),
        }
    }

    async fn on_shutdown(&mut self, _ctx: &mut StageContext) {
        if let Some(handle) = self.inflight.take() {
            handle.abort();
        }
    }
}

struct ReplyForwarder {
    generation: u64,
    token: CancellationToken,
    downstream: FrameSender,
    feedback: mpsc::Sender<Frame>,
    events: mpsc::Sender<PipelineEvent>,
    control: Arc<GenerationControl>,
    seq: Arc<SequenceAllocator>,
}

impl ReplyForwarder {
    async fn run(self, mut rx: mpsc::Receiver<ReplyChunk>) {
        let mut text = String::new();
        let mut completed = false;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                chunk = rx.recv() => match chunk {
                    Some(ReplyChunk::Text(t)) => {
                        text.push_str(&t);
                        let frame = Frame {
                            seq: self.seq.next(Direction::Inbound),
                            generation: self.generation,
                            payload: FramePayload::Text(TextFrame { text: t }),
                        };
                        if self.downstream.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(ReplyChunk::Audio(a)) => {
                        let frame = Frame {
                            seq: self.seq.next(Direction::Outbound),
                            generation: self.generation,
                            payload: FramePayload::Audio(AudioFrame {
                                samples: a.samples,
                                sample_rate: a.sample_rate,
                                channels: a.channels,
                                direction: Direction::Outbound,
                            }),
                        };
                        if self.downstream.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(ReplyChunk::Done) => {
                        completed = true;
                        break;
                    }
                    None => {
                        tracing::warn!(
                            generation = self.generation,
                            "reply stream closed without end-of-turn marker"
                        );
                        break;
                    }
                },
            }
        }

        if completed && !self.token.is_cancelled() {
            self.control.finish(self.generation);
            if !text.is_empty() {
                let frame = Frame {
                    seq: self.seq.next(Direction::Inbound),
                    generation: self.generation,
                    payload: FramePayload::Transcript(TranscriptFrame {
                        speaker: Role::Assistant,
                        text,
                        is_final: true,
                    }),
                };
                let _ = self.feedback.send(frame).await;
            }
            let _ = self
                .events
                .send(PipelineEvent::GenerationCompleted {
                    generation: self.generation,
                })
                .await;
        } else {
            tracing::debug!(
                generation = self.generation,
                "generation cancelled, partial reply discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ContextFrame;
    use crate::pipeline::stage::FrameSender;
    use tokio::sync::broadcast;
    use voxline_foundation::ServiceError;
    use voxline_services::ConversationTurn;

    /// Scripted generator: streams the given chunks with a pause between
    /// them, honoring cancellation.
    struct ScriptedGenerator {
        chunks: Vec<ReplyChunk>,
        chunk_gap: Duration,
    }

    #[async_trait]
    impl ReplyGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _snapshot: ContextSnapshot,
            cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<ReplyChunk>, ServiceError> {
            let (tx, rx) = mpsc::channel(4);
            let chunks = self.chunks.clone();
            let gap = self.chunk_gap;
            tokio::spawn(async move {
                for chunk in chunks {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(gap).await;
                }
            });
            Ok(rx)
        }
    }

    fn test_ctx(
        control: Arc<GenerationControl>,
    ) -> (StageContext, mpsc::Receiver<Frame>) {
        let (downstream_tx, downstream_rx) = mpsc::channel(64);
        let (tap_tx, _) = broadcast::channel(64);
        let (event_tx, _event_rx) = mpsc::channel(16);
        let ctx = StageContext::new(
            FrameSender::new("generate", downstream_tx, tap_tx),
            event_tx,
            control,
            Arc::new(SequenceAllocator::new()),
        );
        (ctx, downstream_rx)
    }

    fn context_frame() -> Frame {
        Frame {
            seq: 1,
            generation: 0,
            payload: FramePayload::Context(ContextFrame {
                snapshot: ContextSnapshot {
                    turns: vec![ConversationTurn::new(Role::User, "hola")],
                },
            }),
        }
    }

    #[tokio::test]
    async fn completed_generation_feeds_assistant_turn_back() {
        let control = Arc::new(GenerationControl::new());
        let (feedback_tx, mut feedback_rx) = mpsc::channel(8);
        let mut stage = GenerateStage::new(
            Arc::new(ScriptedGenerator {
                chunks: vec![
                    ReplyChunk::Text("que ".into()),
                    ReplyChunk::Text("tal".into()),
                    ReplyChunk::Done,
                ],
                chunk_gap: Duration::from_millis(1),
            }),
            Duration::from_secs(5),
            feedback_tx,
        );
        let (mut ctx, mut rx) = test_ctx(control.clone());

        stage.process(context_frame(), &mut ctx).await.unwrap();

        let feedback = feedback_rx.recv().await.unwrap();
        match feedback.payload {
            FramePayload::Transcript(t) => {
                assert_eq!(t.speaker, Role::Assistant);
                assert_eq!(t.text, "que tal");
                assert!(t.is_final);
            }
            other => panic!("expected assistant transcript, got {other:?}"),
        }
        assert!(!control.is_active(), "generation marked finished");

        let mut texts = Vec::new();
        while let Ok(f) = rx.try_recv() {
            if let FramePayload::Text(t) = f.payload {
                texts.push(t.text);
            }
        }
        assert_eq!(texts, vec!["que ".to_string(), "tal".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_generation_appends_nothing() {
        let control = Arc::new(GenerationControl::new());
        let (feedback_tx, mut feedback_rx) = mpsc::channel(8);
        let mut stage = GenerateStage::new(
            Arc::new(ScriptedGenerator {
                chunks: vec![
                    ReplyChunk::Text("muy ".into()),
                    ReplyChunk::Text("largo ".into()),
                    ReplyChunk::Text("chiste".into()),
                    ReplyChunk::Done,
                ],
                chunk_gap: Duration::from_millis(20),
            }),
            Duration::from_secs(5),
            feedback_tx,
        );
        let (mut ctx, _rx) = test_ctx(control.clone());

        stage.process(context_frame(), &mut ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Barge-in.
        control.invalidate();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(
            feedback_rx.try_recv().is_err(),
            "no partial assistant turn after cancellation"
        );
    }

    #[tokio::test]
    async fn new_context_supersedes_inflight_generation() {
        let control = Arc::new(GenerationControl::new());
        let (feedback_tx, mut feedback_rx) = mpsc::channel(8);
        let mut stage = GenerateStage::new(
            Arc::new(ScriptedGenerator {
                chunks: vec![ReplyChunk::Text("lento".into()), ReplyChunk::Done],
                chunk_gap: Duration::from_millis(40),
            }),
            Duration::from_secs(5),
            feedback_tx,
        );
        let (mut ctx, _rx) = test_ctx(control.clone());

        stage.process(context_frame(), &mut ctx).await.unwrap();
        let first_generation = control.current();
        stage.process(context_frame(), &mut ctx).await.unwrap();
        assert!(control.current() > first_generation);

        // Only the second generation may complete.
        let feedback = feedback_rx.recv().await.unwrap();
        assert_eq!(feedback.generation, control.current());
        assert!(feedback_rx.try_recv().is_err());
    }

    /// Speech-to-speech backend whose audio push fails `fail_count` times
    /// transiently before accepting.
    struct FlakyPushGenerator {
        fail_count: u32,
        push_calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl ReplyGenerator for FlakyPushGenerator {
        async fn generate(
            &self,
            _snapshot: ContextSnapshot,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<ReplyChunk>, ServiceError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn push_audio(&self, _chunk: AudioChunk) -> Result<(), ServiceError> {
            use std::sync::atomic::Ordering;
            let call = self.push_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_count {
                return Err(ServiceError::Transient("backend hiccup".into()));
            }
            Ok(())
        }
    }

    fn inbound_audio() -> Frame {
        Frame {
            seq: 2,
            generation: 0,
            payload: FramePayload::Audio(AudioFrame {
                samples: vec![300; 160],
                sample_rate: 8_000,
                channels: 1,
                direction: Direction::Inbound,
            }),
        }
    }

    #[tokio::test]
    async fn transient_audio_push_failure_is_retried_once() {
        let control = Arc::new(GenerationControl::new());
        let (feedback_tx, _feedback_rx) = mpsc::channel(8);
        let generator = Arc::new(FlakyPushGenerator {
            fail_count: 1,
            push_calls: std::sync::atomic::AtomicU32::new(0),
        });
        let mut stage = GenerateStage::new(
            generator.clone(),
            Duration::from_secs(5),
            feedback_tx,
        );
        let (mut ctx, _rx) = test_ctx(control);

        stage.process(inbound_audio(), &mut ctx).await.unwrap();
        assert_eq!(
            generator.push_calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn repeated_audio_push_failure_surfaces_as_stage_error() {
        let control = Arc::new(GenerationControl::new());
        let (feedback_tx, _feedback_rx) = mpsc::channel(8);
        let mut stage = GenerateStage::new(
            Arc::new(FlakyPushGenerator {
                fail_count: 2,
                push_calls: std::sync::atomic::AtomicU32::new(0),
            }),
            Duration::from_secs(5),
            feedback_tx,
        );
        let (mut ctx, _rx) = test_ctx(control);

        let result = stage.process(inbound_audio(), &mut ctx).await;
        assert!(matches!(
            result,
            Err(PipelineError::Service { stage: "llm", .. })
        ));
    }

    #[tokio::test]
    async fn fatal_generate_error_reports_stage() {
        struct FailingGenerator;

        #[async_trait]
        impl ReplyGenerator for FailingGenerator {
            async fn generate(
                &self,
                _snapshot: ContextSnapshot,
                _cancel: CancellationToken,
            ) -> Result<mpsc::Receiver<ReplyChunk>, ServiceError> {
                Err(ServiceError::Fatal("model rejected request".into()))
            }
        }

        let control = Arc::new(GenerationControl::new());
        let (feedback_tx, _feedback_rx) = mpsc::channel(8);
        let mut stage = GenerateStage::new(
            Arc::new(FailingGenerator),
            Duration::from_secs(5),
            feedback_tx,
        );
        let (mut ctx, _rx) = test_ctx(control.clone());

        let result = stage.process(context_frame(), &mut ctx).await;
        assert!(matches!(
            result,
            Err(PipelineError::Service { stage: "llm", .. })
        ));
        assert!(!control.is_active());
    }
}
