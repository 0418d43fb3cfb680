use crate::types::{TurnEvent, TurnState};

/// A turn-detection engine.
///
/// `process` consumes one PCM frame (mono i16) and may emit a boundary
/// event. Implementations own their debounce so that emitted events always
/// alternate started/stopped.
pub trait VadEngine: Send {
    fn process(&mut self, frame: &[i16]) -> Option<TurnEvent>;

    /// Force-close an open speech segment, e.g. on session teardown.
    fn finish(&mut self) -> Option<TurnEvent>;

    fn reset(&mut self);

    fn current_state(&self) -> TurnState;
}
