//! The frame model: the unit of communication between pipeline stages.

use std::sync::atomic::{AtomicU64, Ordering};

use voxline_services::{ContextSnapshot, Role};
use voxline_vad::TurnEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Uniform PCM audio, mono i16.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub direction: Direction,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1_000) / (self.sample_rate as u64 * self.channels as u64)
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptFrame {
    pub speaker: Role,
    pub text: String,
    pub is_final: bool,
}

#[derive(Debug, Clone)]
pub struct ContextFrame {
    pub snapshot: ContextSnapshot,
}

#[derive(Debug, Clone)]
pub struct TextFrame {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    StartRecording,
    StopRecording,
    Interrupt,
    EndSession,
}

#[derive(Debug, Clone)]
pub enum FramePayload {
    Audio(AudioFrame),
    Transcript(TranscriptFrame),
    Context(ContextFrame),
    Text(TextFrame),
    Turn(TurnEvent),
    Control(ControlKind),
}

/// A sequenced, generation-stamped frame. Immutable once created; within a
/// direction, sequence identifiers are strictly increasing end-to-end.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    /// Generation the frame was produced under. After an interruption the
    /// active generation advances and stale cancellable frames are dropped
    /// wherever they are found.
    pub generation: u64,
    pub payload: FramePayload,
}

impl Frame {
    pub fn direction(&self) -> Direction {
        match &self.payload {
            FramePayload::Audio(a) => a.direction,
            _ => Direction::Inbound,
        }
    }

    /// Whether this frame is output produced on behalf of a generation and
    /// therefore subject to stale-generation discard. Caller speech and
    /// committed transcript turns always survive an interruption.
    pub fn is_cancellable(&self) -> bool {
        match &self.payload {
            FramePayload::Context(_) | FramePayload::Text(_) => true,
            FramePayload::Audio(a) => a.direction == Direction::Outbound,
            _ => false,
        }
    }
}

/// Per-direction monotone sequence numbers.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, direction: Direction) -> u64 {
        let counter = match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_monotone_per_direction() {
        let seq = SequenceAllocator::new();
        let a = seq.next(Direction::Inbound);
        let b = seq.next(Direction::Outbound);
        let c = seq.next(Direction::Inbound);
        assert!(c > a);
        assert_eq!(b, 1, "directions count independently");
    }

    #[test]
    fn only_generated_output_is_cancellable() {
        let inbound = Frame {
            seq: 1,
            generation: 0,
            payload: FramePayload::Audio(AudioFrame {
                samples: vec![0; 160],
                sample_rate: 8_000,
                channels: 1,
                direction: Direction::Inbound,
            }),
        };
        assert!(!inbound.is_cancellable());

        let outbound = Frame {
            seq: 1,
            generation: 3,
            payload: FramePayload::Audio(AudioFrame {
                samples: vec![0; 160],
                sample_rate: 8_000,
                channels: 1,
                direction: Direction::Outbound,
            }),
        };
        assert!(outbound.is_cancellable());

        let committed = Frame {
            seq: 2,
            generation: 3,
            payload: FramePayload::Transcript(TranscriptFrame {
                speaker: Role::Assistant,
                text: "listo".into(),
                is_final: true,
            }),
        };
        assert!(!committed.is_cancellable());
    }

    #[test]
    fn audio_duration_accounts_for_rate() {
        let frame = AudioFrame {
            samples: vec![0; 160],
            sample_rate: 8_000,
            channels: 1,
            direction: Direction::Inbound,
        };
        assert_eq!(frame.duration_ms(), 20);
    }
}
