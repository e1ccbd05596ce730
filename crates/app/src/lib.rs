//! StreamVox: a real-time streaming text-to-speech pipeline.
//!
//! Text enters via [`TextToAudioStream::feed`]; PCM leaves through the
//! configured output device. Synthesis and playback overlap, so the first
//! audible sample emerges long before the last character has been fed.
//!
//! ```no_run
//! use streamvox_app::{StreamConfig, TextToAudioStream};
//! use streamvox_tts::MockEngine;
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engines: Vec<Box<dyn streamvox_tts::TtsEngine>> =
//!     vec![Box::new(MockEngine::reliable("demo"))];
//! let stream = TextToAudioStream::new(engines, StreamConfig::default())?;
//!
//! stream.feed("Hello world.")?;
//! stream.play()?;
//! stream.wait_for_playback_complete(std::time::Duration::from_secs(5))?;
//! stream.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod config;
pub mod stream;

pub use callbacks::Callbacks;
pub use config::StreamConfig;
pub use stream::{PipelineStatus, TextToAudioStream};
