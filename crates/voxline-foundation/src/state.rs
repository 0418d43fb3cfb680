use crate::error::SessionError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of one call session. `Closed` is terminal; nothing transitions
/// out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Cancelling,
    Closed,
}

/// Validated session state machine with change notification.
///
/// Duplicate requests (double-disconnect, cancel-after-close) are no-ops by
/// contract, reported through the `Ok(false)` return rather than an error.
pub struct SessionStateMachine {
    state: Arc<RwLock<SessionState>>,
    state_tx: Sender<SessionState>,
    state_rx: Receiver<SessionState>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(SessionState::Connecting)),
            state_tx,
            state_rx,
        }
    }

    /// Attempt a transition. Returns `Ok(true)` if the state changed,
    /// `Ok(false)` for a permitted no-op, and an error for a transition the
    /// lifecycle forbids.
    pub fn transition(&self, new_state: SessionState) -> Result<bool, SessionError> {
        let mut current = self.state.write();

        if *current == new_state || *current == SessionState::Closed {
            return Ok(false);
        }

        let valid = matches!(
            (*current, new_state),
            (SessionState::Connecting, SessionState::Active)
                | (SessionState::Connecting, SessionState::Cancelling)
                | (SessionState::Active, SessionState::Cancelling)
                | (SessionState::Cancelling, SessionState::Closed)
        );

        if !valid {
            return Err(SessionError::InvalidTransition {
                from: *current,
                to: new_state,
            });
        }

        tracing::info!("session state: {:?} -> {:?}", *current, new_state);
        *current = new_state;
        let _ = self.state_tx.send(new_state);
        Ok(true)
    }

    pub fn current(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_closed(&self) -> bool {
        self.current() == SessionState::Closed
    }

    pub fn subscribe(&self) -> Receiver<SessionState> {
        self.state_rx.clone()
    }
}
