//! Audio tap: a passive observer of both audio directions that accumulates
//! a time-aligned recording of the call.
//!
//! The tap hangs off the pipeline's broadcast channel, so it can never slow
//! the real-time path; if it lags, it loses frames instead of stalling the
//! chain. Recording is switched by `StartRecording` / `StopRecording`
//! control frames on that same stream, so control and audio arrive in one
//! ordered sequence and no frame can slip past an un-started recorder.
//! Caller and agent audio land on separate channels positioned by
//! wall-clock arrival time, which keeps the two sides aligned even though
//! the agent is silent most of the time.

use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::frame::{ControlKind, Direction, Frame, FramePayload};

#[derive(Debug)]
pub enum TapCommand {
    /// Stop, hand back the recording, and exit. Answered exactly once.
    Finalize {
        reply: oneshot::Sender<Option<RecordingData>>,
    },
}

/// A finished recording: interleaved stereo PCM, caller on the left channel,
/// agent on the right.
#[derive(Debug, Clone)]
pub struct RecordingData {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RecordingData {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1_000)
            / (self.sample_rate as u64 * self.channels as u64)
    }
}

/// Accumulates one mono channel per direction. Gaps (periods where one side
/// was silent) are zero-filled so both channels stay on the same clock.
pub struct RecordingBuffer {
    caller: Vec<i16>,
    agent: Vec<i16>,
    sample_rate: u32,
    max_samples: usize,
    capped: bool,
}

impl RecordingBuffer {
    pub fn new(sample_rate: u32, max_ms: u64) -> Self {
        let max_samples = (max_ms * sample_rate as u64 / 1_000) as usize;
        Self {
            caller: Vec::new(),
            agent: Vec::new(),
            sample_rate,
            max_samples,
            capped: false,
        }
    }

    /// Append samples for one direction at the given offset from recording
    /// start. Frames never rewind an already-written channel; an offset in
    /// the past appends at the channel's current end instead.
    pub fn append(&mut self, direction: Direction, samples: &[i16], at_ms: u64) {
        let pos = (at_ms * self.sample_rate as u64 / 1_000) as usize;
        let max_samples = self.max_samples;
        let channel = match direction {
            Direction::Inbound => &mut self.caller,
            Direction::Outbound => &mut self.agent,
        };

        let start = pos.max(channel.len());
        if start >= max_samples {
            if !self.capped {
                tracing::warn!(
                    max_samples,
                    "recording cap reached, dropping further audio"
                );
                self.capped = true;
            }
            return;
        }
        if channel.len() < start {
            channel.resize(start, 0);
        }
        let room = max_samples - channel.len();
        let take = samples.len().min(room);
        channel.extend_from_slice(&samples[..take]);
        if take < samples.len() && !self.capped {
            tracing::warn!(max_samples, "recording cap reached, truncating audio");
            self.capped = true;
        }
    }

    /// Produce the final stereo recording, or `None` when no audio was ever
    /// captured on either side. Both channels are zero-padded out to
    /// `connected_ms`, so trailing silence before hang-up is kept, not
    /// compressed: the recording spans the whole connection.
    pub fn finalize(mut self, connected_ms: u64) -> Option<RecordingData> {
        if self.caller.is_empty() && self.agent.is_empty() {
            return None;
        }
        let connected_samples =
            ((connected_ms * self.sample_rate as u64 / 1_000) as usize).min(self.max_samples);
        let len = self
            .caller
            .len()
            .max(self.agent.len())
            .max(connected_samples);
        self.caller.resize(len, 0);
        self.agent.resize(len, 0);

        let mut samples = Vec::with_capacity(len * 2);
        for (c, a) in self.caller.iter().zip(self.agent.iter()) {
            samples.push(*c);
            samples.push(*a);
        }
        Some(RecordingData {
            samples,
            sample_rate: self.sample_rate,
            channels: 2,
        })
    }
}

struct TapState {
    buffer: RecordingBuffer,
    epoch: Instant,
    recording: bool,
    stopped_at_ms: Option<u64>,
}

impl TapState {
    fn observe(&mut self, frame: &Frame) {
        match &frame.payload {
            FramePayload::Control(ControlKind::StartRecording) => {
                self.epoch = Instant::now();
                self.recording = true;
                self.stopped_at_ms = None;
                tracing::debug!("recording started");
            }
            FramePayload::Control(ControlKind::StopRecording) => {
                if self.recording {
                    self.stopped_at_ms = Some(self.epoch.elapsed().as_millis() as u64);
                    self.recording = false;
                    tracing::debug!("recording stopped");
                }
            }
            FramePayload::Audio(audio) if self.recording => {
                let at_ms = self.epoch.elapsed().as_millis() as u64;
                self.buffer.append(audio.direction, &audio.samples, at_ms);
            }
            _ => {}
        }
    }

    fn finalize(self) -> Option<RecordingData> {
        let connected_ms = self.stopped_at_ms.unwrap_or_else(|| {
            if self.recording {
                self.epoch.elapsed().as_millis() as u64
            } else {
                0
            }
        });
        self.buffer.finalize(connected_ms)
    }
}

/// Run the tap as its own task. Recording start/stop arrives as control
/// frames on the observed stream, in FIFO order with the audio; `Finalize`
/// comes from the session on teardown and answers with the finished
/// recording after draining frames still queued on the stream.
pub fn spawn_tap(
    mut frames: broadcast::Receiver<Frame>,
    mut commands: mpsc::Receiver<TapCommand>,
    buffer: RecordingBuffer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = TapState {
            buffer,
            epoch: Instant::now(),
            recording: false,
            stopped_at_ms: None,
        };
        let mut frames_closed = false;
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(TapCommand::Finalize { reply }) => {
                        loop {
                            match frames.try_recv() {
                                Ok(frame) => state.observe(&frame),
                                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                                    tracing::warn!(missed, "tap lagged behind the pipeline");
                                }
                                Err(_) => break,
                            }
                        }
                        let _ = reply.send(state.finalize());
                        break;
                    }
                    None => break,
                },
                res = frames.recv(), if !frames_closed => match res {
                    Ok(frame) => state.observe(&frame),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "tap lagged behind the pipeline");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        frames_closed = true;
                    }
                },
            }
        }
        tracing::debug!("tap task exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::AudioFrame;

    fn control(kind: ControlKind) -> Frame {
        Frame {
            seq: 0,
            generation: 0,
            payload: FramePayload::Control(kind),
        }
    }

    fn audio(direction: Direction, value: i16) -> Frame {
        Frame {
            seq: 1,
            generation: 0,
            payload: FramePayload::Audio(AudioFrame {
                samples: vec![value; 160],
                sample_rate: 8_000,
                channels: 1,
                direction,
            }),
        }
    }

    #[test]
    fn channels_align_by_offset() {
        let mut buf = RecordingBuffer::new(8_000, 60_000);
        // Caller speaks during the first 20ms, agent answers at 100ms.
        buf.append(Direction::Inbound, &[5; 160], 0);
        buf.append(Direction::Outbound, &[9; 160], 100);

        let rec = buf.finalize(0).unwrap();
        assert_eq!(rec.channels, 2);
        // 100ms + 20ms of audio on the agent channel = 960 frames.
        assert_eq!(rec.samples.len(), 960 * 2);
        // At t=0 the caller is audible and the agent silent.
        assert_eq!(rec.samples[0], 5);
        assert_eq!(rec.samples[1], 0);
        // At t=100ms the reverse.
        let at_100ms = 800 * 2;
        assert_eq!(rec.samples[at_100ms], 0);
        assert_eq!(rec.samples[at_100ms + 1], 9);
    }

    #[test]
    fn past_offsets_append_without_rewinding() {
        let mut buf = RecordingBuffer::new(8_000, 60_000);
        buf.append(Direction::Inbound, &[1; 160], 0);
        // Arrives "late" with an offset inside already-written audio.
        buf.append(Direction::Inbound, &[2; 160], 10);

        let rec = buf.finalize(0).unwrap();
        assert_eq!(rec.samples.len(), 320 * 2);
        assert_eq!(rec.samples[0], 1);
        assert_eq!(rec.samples[160 * 2], 2, "second frame follows the first");
    }

    #[test]
    fn empty_buffer_finalizes_to_none() {
        let buf = RecordingBuffer::new(8_000, 60_000);
        assert!(buf.finalize(5_000).is_none(), "no audio means no recording");
    }

    #[test]
    fn one_sided_recording_zero_fills_the_other_channel() {
        let mut buf = RecordingBuffer::new(8_000, 60_000);
        buf.append(Direction::Inbound, &[7; 320], 0);
        let rec = buf.finalize(0).unwrap();
        assert_eq!(rec.samples.len(), 320 * 2);
        assert!(rec.samples.iter().skip(1).step_by(2).all(|s| *s == 0));
    }

    #[test]
    fn trailing_silence_pads_to_connection_duration() {
        let mut buf = RecordingBuffer::new(8_000, 60_000);
        // One 20ms frame, then the caller stays quiet until hang-up at 320ms.
        buf.append(Direction::Inbound, &[5; 160], 0);
        let rec = buf.finalize(320).unwrap();
        assert_eq!(rec.duration_ms(), 320, "silence is kept, not compressed");
        assert_eq!(rec.samples[0], 5);
        assert_eq!(*rec.samples.last().unwrap(), 0);
    }

    #[test]
    fn connection_padding_respects_the_cap() {
        // 100ms cap, 500ms connection.
        let mut buf = RecordingBuffer::new(8_000, 100);
        buf.append(Direction::Inbound, &[3; 160], 0);
        let rec = buf.finalize(500).unwrap();
        assert_eq!(rec.duration_ms(), 100);
    }

    #[test]
    fn cap_bounds_memory_and_truncates() {
        // 8kHz, 100ms cap = 800 samples per channel.
        let mut buf = RecordingBuffer::new(8_000, 100);
        buf.append(Direction::Inbound, &[3; 1_000], 0);
        buf.append(Direction::Inbound, &[3; 1_000], 125);
        let rec = buf.finalize(0).unwrap();
        assert_eq!(rec.samples.len(), 800 * 2);
    }

    #[tokio::test]
    async fn frames_right_after_start_are_never_lost() {
        let (frame_tx, frame_rx) = broadcast::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = spawn_tap(frame_rx, cmd_rx, RecordingBuffer::new(8_000, 60_000));

        // Start and audio share one ordered stream: audio published
        // immediately after the start marker must always be captured.
        frame_tx.send(control(ControlKind::StartRecording)).unwrap();
        frame_tx.send(audio(Direction::Inbound, 4)).unwrap();
        frame_tx.send(audio(Direction::Outbound, 6)).unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(TapCommand::Finalize { reply: reply_tx })
            .await
            .unwrap();
        let rec = reply_rx.await.unwrap().expect("audio was captured");
        assert_eq!(rec.channels, 2);
        assert!(rec.samples.iter().step_by(2).any(|s| *s == 4));
        assert!(rec.samples.iter().skip(1).step_by(2).any(|s| *s == 6));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn audio_before_start_or_after_stop_is_excluded() {
        let (frame_tx, frame_rx) = broadcast::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = spawn_tap(frame_rx, cmd_rx, RecordingBuffer::new(8_000, 60_000));

        frame_tx.send(audio(Direction::Inbound, 1)).unwrap();
        frame_tx.send(control(ControlKind::StartRecording)).unwrap();
        frame_tx.send(audio(Direction::Inbound, 2)).unwrap();
        frame_tx.send(control(ControlKind::StopRecording)).unwrap();
        frame_tx.send(audio(Direction::Inbound, 3)).unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(TapCommand::Finalize { reply: reply_tx })
            .await
            .unwrap();
        let rec = reply_rx.await.unwrap().expect("mid-recording audio kept");
        let caller: Vec<i16> = rec.samples.iter().step_by(2).copied().collect();
        assert!(caller.contains(&2));
        assert!(!caller.contains(&1), "pre-start audio excluded");
        assert!(!caller.contains(&3), "post-stop audio excluded");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn finalize_before_any_audio_yields_none() {
        let (_frame_tx, frame_rx) = broadcast::channel::<Frame>(4);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = spawn_tap(frame_rx, cmd_rx, RecordingBuffer::new(8_000, 60_000));

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(TapCommand::Finalize { reply: reply_tx })
            .await
            .unwrap();
        assert!(reply_rx.await.unwrap().is_none());
        task.await.unwrap();
    }
}
