//! Scripted service adapters: deterministic stand-ins for the external
//! speech and language backends, used by the demo binary and the tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voxline_foundation::ServiceError;
use voxline_services::{
    AudioChunk, ContextSnapshot, ReplyChunk, ReplyGenerator, SpeechToText, TextToSpeech,
    TranscriptEvent,
};
use voxline_vad::{EnergyVad, VadConfig, VadEngine};

use crate::pipeline::PipelineServices;

/// Recognizes every utterance as the next line of its script, cycling.
pub struct CannedStt {
    lines: Vec<String>,
    next: usize,
}

impl CannedStt {
    pub fn new<S: Into<String>>(lines: Vec<S>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            next: 0,
        }
    }
}

#[async_trait]
impl SpeechToText for CannedStt {
    async fn push_audio(
        &mut self,
        _samples: &[i16],
        _sample_rate: u32,
    ) -> Result<Vec<TranscriptEvent>, ServiceError> {
        Ok(vec![])
    }

    async fn finalize_utterance(&mut self) -> Result<Option<TranscriptEvent>, ServiceError> {
        if self.lines.is_empty() {
            return Ok(None);
        }
        let text = self.lines[self.next % self.lines.len()].clone();
        self.next += 1;
        Ok(Some(TranscriptEvent::Final { text }))
    }
}

/// Streams the next scripted reply word by word, honoring cancellation
/// between words.
pub struct ScriptedReplies {
    replies: Vec<String>,
    chunk_gap: Duration,
    next: AtomicUsize,
}

impl ScriptedReplies {
    pub fn new<S: Into<String>>(replies: Vec<S>, chunk_gap: Duration) -> Self {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            chunk_gap,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedReplies {
    async fn generate(
        &self,
        _snapshot: ContextSnapshot,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ReplyChunk>, ServiceError> {
        if self.replies.is_empty() {
            return Err(ServiceError::Fatal("empty reply script".into()));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        let words: Vec<String> = self.replies[index]
            .split_whitespace()
            .map(|w| format!("{w} "))
            .collect();
        let gap = self.chunk_gap;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for word in words {
                if cancel.is_cancelled() {
                    return;
                }
                if tx.send(ReplyChunk::Text(word)).await.is_err() {
                    return;
                }
                tokio::time::sleep(gap).await;
            }
            let _ = tx.send(ReplyChunk::Done).await;
        });
        Ok(rx)
    }
}

/// Completes every generation immediately with no output at all.
pub struct SilentGenerator;

#[async_trait]
impl ReplyGenerator for SilentGenerator {
    async fn generate(
        &self,
        _snapshot: ContextSnapshot,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ReplyChunk>, ServiceError> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tx.send(ReplyChunk::Done).await;
        });
        Ok(rx)
    }
}

/// "Speaks" by emitting 20ms tone chunks, one per few characters of input,
/// paced in near real time so barge-in has something to interrupt.
pub struct ToneTts {
    sample_rate: u32,
    chunk_gap: Duration,
}

impl ToneTts {
    pub fn new(sample_rate: u32, chunk_gap: Duration) -> Self {
        Self {
            sample_rate,
            chunk_gap,
        }
    }

    fn tone_chunk(&self) -> AudioChunk {
        let samples_per_chunk = (self.sample_rate / 50) as usize;
        let samples: Vec<i16> = (0..samples_per_chunk)
            .map(|i| {
                let phase =
                    2.0 * std::f32::consts::PI * i as f32 * 440.0 / self.sample_rate as f32;
                (phase.sin() * 8_000.0) as i16
            })
            .collect();
        AudioChunk {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }
}

#[async_trait]
impl TextToSpeech for ToneTts {
    async fn synthesize(
        &self,
        text: String,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<AudioChunk>, ServiceError> {
        let chunks = (text.chars().count() / 4).clamp(1, 50);
        let chunk = self.tone_chunk();
        let gap = self.chunk_gap;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for _ in 0..chunks {
                if cancel.is_cancelled() {
                    return;
                }
                if tx.send(chunk.clone()).await.is_err() {
                    return;
                }
                tokio::time::sleep(gap).await;
            }
        });
        Ok(rx)
    }
}

pub fn default_vad() -> Box<dyn VadEngine> {
    Box::new(EnergyVad::new(VadConfig::default()))
}

/// Full cascaded service set with the comedian script.
pub fn scripted_services() -> PipelineServices {
    PipelineServices {
        stt: Some(Box::new(CannedStt::new(vec![
            "hola",
            "cuentame un chiste",
            "otro por favor",
        ]))),
        generator: Arc::new(ScriptedReplies::new(
            vec![
                "Hola, soy tu comico de confianza.",
                "Que le dice un semaforo a otro? No me mires, me estoy cambiando.",
                "Este es el ultimo, lo prometo.",
            ],
            Duration::from_millis(5),
        )),
        tts: Some(Arc::new(ToneTts::new(8_000, Duration::from_millis(5)))),
        vad: default_vad(),
    }
}

/// Minimal native-topology service set that never produces output.
pub fn silent_services() -> PipelineServices {
    PipelineServices {
        stt: None,
        generator: Arc::new(SilentGenerator),
        tts: None,
        vad: default_vad(),
    }
}
