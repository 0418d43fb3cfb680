use crate::types::{TurnEvent, TurnState};

/// Debounced Silence <-> Speaking state machine.
///
/// Speech candidates arriving while already in `Speaking` are a
/// continuation, never a second `SpeechStarted`; likewise for silence. This
/// is where the alternation guarantee lives.
pub struct TurnStateMachine {
    state: TurnState,
    speech_ms: f32,
    silence_ms: f32,
    speech_debounce_ms: f32,
    silence_debounce_ms: f32,
    clock_ms: f64,
    speech_started_ms: u64,
}

impl TurnStateMachine {
    pub fn new(speech_debounce_ms: u32, silence_debounce_ms: u32) -> Self {
        Self {
            state: TurnState::Silence,
            speech_ms: 0.0,
            silence_ms: 0.0,
            speech_debounce_ms: speech_debounce_ms as f32,
            silence_debounce_ms: silence_debounce_ms as f32,
            clock_ms: 0.0,
            speech_started_ms: 0,
        }
    }

    /// Advance the clock by one frame and fold in its speech decision.
    pub fn process(&mut self, is_speech: bool, frame_ms: f32, energy_db: f32) -> Option<TurnEvent> {
        self.clock_ms += frame_ms as f64;
        let now_ms = self.clock_ms as u64;

        match self.state {
            TurnState::Silence => {
                if is_speech {
                    self.speech_ms += frame_ms;
                    if self.speech_ms >= self.speech_debounce_ms {
                        self.state = TurnState::Speaking;
                        self.speech_ms = 0.0;
                        self.silence_ms = 0.0;
                        self.speech_started_ms = now_ms;
                        return Some(TurnEvent::SpeechStarted {
                            timestamp_ms: now_ms,
                            energy_db,
                        });
                    }
                } else {
                    self.speech_ms = 0.0;
                }
            }
            TurnState::Speaking => {
                if is_speech {
                    self.silence_ms = 0.0;
                } else {
                    self.silence_ms += frame_ms;
                    if self.silence_ms >= self.silence_debounce_ms {
                        self.state = TurnState::Silence;
                        self.silence_ms = 0.0;
                        return Some(TurnEvent::SpeechStopped {
                            timestamp_ms: now_ms,
                            duration_ms: now_ms.saturating_sub(self.speech_started_ms).max(1),
                        });
                    }
                }
            }
        }

        None
    }

    /// Close an open segment without waiting out the silence debounce.
    pub fn force_stop(&mut self) -> Option<TurnEvent> {
        if self.state != TurnState::Speaking {
            return None;
        }
        self.state = TurnState::Silence;
        self.silence_ms = 0.0;
        let now_ms = self.clock_ms as u64;
        Some(TurnEvent::SpeechStopped {
            timestamp_ms: now_ms,
            duration_ms: now_ms.saturating_sub(self.speech_started_ms).max(1),
        })
    }

    pub fn current_state(&self) -> TurnState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = TurnState::Silence;
        self.speech_ms = 0.0;
        self.silence_ms = 0.0;
        self.clock_ms = 0.0;
        self.speech_started_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: f32 = 20.0;

    fn drive(sm: &mut TurnStateMachine, speech: bool, frames: usize) -> Vec<TurnEvent> {
        (0..frames)
            .filter_map(|_| sm.process(speech, FRAME_MS, -30.0))
            .collect()
    }

    #[test]
    fn start_fires_after_debounce() {
        let mut sm = TurnStateMachine::new(100, 300);
        assert!(drive(&mut sm, true, 4).is_empty()); // 80ms, below debounce
        let events = drive(&mut sm, true, 1); // crosses 100ms
        assert!(matches!(events.as_slice(), [TurnEvent::SpeechStarted { .. }]));
    }

    #[test]
    fn events_strictly_alternate() {
        let mut sm = TurnStateMachine::new(40, 60);
        let mut events = Vec::new();
        // Speech, pause, speech, long silence.
        for &(speech, frames) in &[(true, 10), (false, 2), (true, 10), (false, 10)] {
            events.extend(drive(&mut sm, speech, frames));
        }
        let starts = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::SpeechStarted { .. }))
            .count();
        let stops = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::SpeechStopped { .. }))
            .count();
        assert_eq!(starts, 1, "short pause must not split the utterance");
        assert_eq!(stops, 1);
        assert!(matches!(events[0], TurnEvent::SpeechStarted { .. }));
        assert!(matches!(events[1], TurnEvent::SpeechStopped { .. }));
    }

    #[test]
    fn speech_during_speaking_is_continuation() {
        let mut sm = TurnStateMachine::new(40, 60);
        drive(&mut sm, true, 5);
        assert_eq!(sm.current_state(), TurnState::Speaking);
        // A second run of speech candidates must not produce a second start.
        assert!(drive(&mut sm, true, 50).is_empty());
    }

    #[test]
    fn force_stop_closes_open_segment() {
        let mut sm = TurnStateMachine::new(40, 60);
        drive(&mut sm, true, 5);
        let ev = sm.force_stop().unwrap();
        assert!(matches!(ev, TurnEvent::SpeechStopped { .. }));
        assert!(sm.force_stop().is_none());
    }

    #[test]
    fn stop_reports_segment_duration() {
        let mut sm = TurnStateMachine::new(20, 40);
        drive(&mut sm, true, 10); // start at 20ms, speak to 200ms
        let events = drive(&mut sm, false, 2);
        match events.as_slice() {
            [TurnEvent::SpeechStopped { duration_ms, .. }] => {
                assert!(*duration_ms >= 200, "duration_ms = {duration_ms}");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
