//! Voice metadata and engine status.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Voice metadata as reported by an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    /// Engine-specific voice identifier.
    pub id: String,
    pub name: String,
    /// Language code (e.g. "en-US").
    pub language: String,
    pub gender: Option<VoiceGender>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceGender {
    Male,
    Female,
    Neutral,
    Unknown,
}

/// Static description of an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub capabilities: EngineCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Emits PCM incrementally rather than one blob per sentence.
    pub streaming: bool,
    /// Can report per-word timings.
    pub word_timings: bool,
    /// ISO 639-1 language codes.
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready,
    Synthesizing,
    Error,
    Closed,
}

impl EngineStatus {
    /// Whether `self -> to` is a legal transition. `Error` and `Closed` are
    /// reachable from anywhere; `Closed` is terminal.
    pub fn can_transition(self, to: EngineStatus) -> bool {
        if self == EngineStatus::Closed {
            return false;
        }
        match to {
            EngineStatus::Error | EngineStatus::Closed => true,
            // Re-initialization is allowed after a stop or a failure.
            EngineStatus::Initializing => matches!(
                self,
                EngineStatus::Uninitialized | EngineStatus::Ready | EngineStatus::Error
            ),
            EngineStatus::Ready => matches!(
                self,
                EngineStatus::Initializing | EngineStatus::Synthesizing | EngineStatus::Error
            ),
            EngineStatus::Synthesizing => self == EngineStatus::Ready,
            EngineStatus::Uninitialized => false,
        }
    }
}

/// Shared status slot with transition validation. Illegal transitions are
/// logged and ignored rather than poisoning the engine.
#[derive(Clone, Debug, Default)]
pub struct EngineStatusCell {
    inner: Arc<RwLock<Option<EngineStatus>>>,
}

impl EngineStatusCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(EngineStatus::Uninitialized))),
        }
    }

    pub fn get(&self) -> EngineStatus {
        self.inner.read().unwrap_or(EngineStatus::Uninitialized)
    }

    pub fn set(&self, to: EngineStatus) -> bool {
        let mut guard = self.inner.write();
        let current = guard.unwrap_or(EngineStatus::Uninitialized);
        if !current.can_transition(to) {
            tracing::warn!("Ignoring invalid engine status transition {current:?} -> {to:?}");
            return false;
        }
        *guard = Some(to);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let cell = EngineStatusCell::new();
        assert_eq!(cell.get(), EngineStatus::Uninitialized);
        assert!(cell.set(EngineStatus::Initializing));
        assert!(cell.set(EngineStatus::Ready));
        assert!(cell.set(EngineStatus::Synthesizing));
        assert!(cell.set(EngineStatus::Ready));
        assert!(cell.set(EngineStatus::Closed));
    }

    #[test]
    fn error_reachable_from_anywhere_and_recoverable() {
        let cell = EngineStatusCell::new();
        assert!(cell.set(EngineStatus::Error));
        assert!(cell.set(EngineStatus::Ready));
    }

    #[test]
    fn closed_is_terminal() {
        let cell = EngineStatusCell::new();
        cell.set(EngineStatus::Closed);
        assert!(!cell.set(EngineStatus::Initializing));
        assert!(!cell.set(EngineStatus::Error));
        assert_eq!(cell.get(), EngineStatus::Closed);
    }

    #[test]
    fn synthesizing_requires_ready() {
        let cell = EngineStatusCell::new();
        assert!(!cell.set(EngineStatus::Synthesizing));
        assert_eq!(cell.get(), EngineStatus::Uninitialized);
    }
}
