use crate::error::PipelineError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Playing,
    Paused,
    Stopping,
    Stopped,
}

impl PipelineState {
    /// States reachable from `self`. Everything else is a caller bug.
    fn successors(self) -> &'static [PipelineState] {
        use PipelineState::*;
        match self {
            Idle => &[Playing],
            Playing => &[Paused, Stopping],
            Paused => &[Playing, Stopping],
            Stopping => &[Stopped],
            Stopped => &[Playing],
        }
    }

    pub fn can_advance_to(self, next: PipelineState) -> bool {
        self.successors().contains(&next)
    }
}

/// Tracks the orchestrator lifecycle against the successor table above.
/// Accepted changes are broadcast to watchers in order.
pub struct StateManager {
    phase: RwLock<PipelineState>,
    notify_tx: Sender<PipelineState>,
    notify_rx: Receiver<PipelineState>,
}

impl StateManager {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        Self {
            phase: RwLock::new(PipelineState::Idle),
            notify_tx,
            notify_rx,
        }
    }

    pub fn transition(&self, next: PipelineState) -> Result<(), PipelineError> {
        let mut phase = self.phase.write();
        if !phase.can_advance_to(next) {
            return Err(PipelineError::Fatal(format!(
                "pipeline cannot move from {:?} to {:?}",
                *phase, next
            )));
        }
        tracing::debug!(from = ?*phase, to = ?next, "pipeline state change");
        *phase = next;
        let _ = self.notify_tx.send(next);
        Ok(())
    }

    pub fn current(&self) -> PipelineState {
        *self.phase.read()
    }

    /// Receiver observing every accepted transition.
    pub fn watch(&self) -> Receiver<PipelineState> {
        self.notify_rx.clone()
    }
}
