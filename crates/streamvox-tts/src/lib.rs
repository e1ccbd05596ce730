//! Text-to-speech engine abstraction for StreamVox.
//!
//! Defines the engine contract the orchestrator drives, the shared plumbing
//! concrete engines compose (`EngineCore`), and a configurable mock engine
//! for exercising the pipeline without external processes.

pub mod engine;
pub mod error;
pub mod mock;
pub mod types;

pub use engine::{approximate_timings, EngineCore, TtsEngine};
pub use error::{EngineError, EngineResult};
pub use mock::{MockEngine, MockEngineConfig, MockFailure};
pub use types::{
    EngineCapabilities, EngineInfo, EngineStatus, EngineStatusCell, Voice, VoiceGender,
};
