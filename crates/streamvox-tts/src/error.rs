//! Error types for TTS engines.

use thiserror::Error;

/// Engine error taxonomy. The orchestrator branches on the class: transient
/// failures are retried or failed over, unavailability fails over without
/// retry, and cancellation returns silently.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine is not installed, not reachable or not initialized.
    #[error("Engine not available: {0}")]
    Unavailable(String),

    /// Failure that may succeed on retry or on another engine.
    #[error("Transient engine failure: {0}")]
    Transient(String),

    /// The session's cancel token fired mid-synthesis.
    #[error("Synthesis cancelled")]
    Cancelled,

    /// `stop()` was called; synthesis refuses until re-initialized.
    #[error("Engine stopped")]
    Stopped,

    #[error("Voice not found: {0}")]
    VoiceNotFound(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Invalid text input: {0}")]
    InvalidInput(String),

    #[error("Engine not initialized")]
    NotInitialized,

    #[error("No audio buffer attached")]
    NoBuffer,

    /// The shared buffer was closed underneath the engine; the pipeline is
    /// shutting down.
    #[error("Audio buffer closed")]
    BufferClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error ({engine}): {message}")]
    EngineSpecific { engine: String, message: String },
}

impl EngineError {
    /// Errors that mean "the session is ending", not "this engine failed".
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            EngineError::Cancelled | EngineError::Stopped | EngineError::BufferClosed
        )
    }

    /// Whether the orchestrator should rotate to the next engine.
    pub fn should_failover(&self) -> bool {
        !self.is_cancellation()
            && !matches!(
                self,
                EngineError::InvalidInput(_) | EngineError::InvalidParameter { .. }
            )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
