//! In-flight generation tracking and the interruption protocol.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::stage::{ControlMsg, PipelineEvent};

/// Tracks the single in-flight generation per session.
///
/// The counter advances on every `begin` and `invalidate`; frames stamped
/// with an older generation are stale and get dropped wherever a stage or
/// the egress encounters them. At most one cancellation token is live.
pub struct GenerationControl {
    counter: AtomicU64,
    active: AtomicBool,
    token: Mutex<CancellationToken>,
}

impl Default for GenerationControl {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationControl {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            active: AtomicBool::new(false),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Start a new generation, implicitly cancelling any previous one.
    pub fn begin(&self) -> (u64, CancellationToken) {
        let mut token = self.token.lock();
        token.cancel();
        *token = CancellationToken::new();
        self.active.store(true, Ordering::SeqCst);
        let generation = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, token.clone())
    }

    /// Cancel the current generation without starting a new one (barge-in,
    /// teardown). Returns the new generation watermark; anything stamped
    /// below it is stale.
    pub fn invalidate(&self) -> u64 {
        let mut token = self.token.lock();
        token.cancel();
        *token = CancellationToken::new();
        self.active.store(false, Ordering::SeqCst);
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark a generation as completed. A no-op if a newer one superseded it.
    pub fn finish(&self, generation: u64) {
        if self.current() == generation {
            self.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancellation token for `generation`, or `None` when it is stale.
    pub fn token_for(&self, generation: u64) -> Option<CancellationToken> {
        if self.current() == generation {
            Some(self.token.lock().clone())
        } else {
            None
        }
    }
}

/// Propagates an interruption across the whole pipeline: bumps the
/// generation watermark (cancelling the live token) and pushes an
/// `Interrupt` onto every stage's control channel, which each stage observes
/// ahead of any queued data.
pub struct Interrupter {
    control: Arc<GenerationControl>,
    control_txs: Vec<mpsc::Sender<ControlMsg>>,
    events: mpsc::Sender<PipelineEvent>,
}

impl Interrupter {
    pub fn new(
        control: Arc<GenerationControl>,
        control_txs: Vec<mpsc::Sender<ControlMsg>>,
        events: mpsc::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            control,
            control_txs,
            events,
        }
    }

    pub async fn interrupt(&self) -> u64 {
        let generation = self.control.invalidate();
        for tx in &self.control_txs {
            let _ = tx.send(ControlMsg::Interrupt { generation }).await;
        }
        tracing::info!(generation, "interrupt propagated to all stages");
        let _ = self
            .events
            .send(PipelineEvent::Interrupted { generation })
            .await;
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_supersedes_previous_generation() {
        let control = GenerationControl::new();
        let (g1, t1) = control.begin();
        let (g2, t2) = control.begin();
        assert!(g2 > g1);
        assert!(t1.is_cancelled(), "previous token cancelled on new begin");
        assert!(!t2.is_cancelled());
        assert!(control.token_for(g1).is_none(), "stale generation has no token");
        assert!(control.token_for(g2).is_some());
    }

    #[test]
    fn invalidate_cancels_and_deactivates() {
        let control = GenerationControl::new();
        let (g1, t1) = control.begin();
        assert!(control.is_active());
        let watermark = control.invalidate();
        assert!(t1.is_cancelled());
        assert!(!control.is_active());
        assert!(watermark > g1);
    }

    #[test]
    fn finish_ignores_superseded_generation() {
        let control = GenerationControl::new();
        let (g1, _t1) = control.begin();
        let (_g2, _t2) = control.begin();
        control.finish(g1);
        assert!(control.is_active(), "finishing a stale generation changes nothing");
    }
}
