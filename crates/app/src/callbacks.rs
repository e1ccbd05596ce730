//! Lifecycle event fan-out.
//!
//! Every field is optional and statically typed by event. Dispatch is
//! synchronous on whichever thread produced the event, nil-guarded, and a
//! panicking handler is caught and logged rather than taking the pipeline
//! down. Handlers must not block.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use streamvox_foundation::PipelineError;
use streamvox_tts::EngineError;

type Cb<A> = Option<Arc<dyn Fn(A) + Send + Sync>>;
type Cb0 = Option<Arc<dyn Fn() + Send + Sync>>;
type Cb2<A, B> = Option<Arc<dyn Fn(A, B) + Send + Sync>>;

#[derive(Clone, Default)]
pub struct Callbacks {
    // Text side
    pub on_character: Cb<char>,
    pub on_word: Cb<String>,
    pub on_sentence: Cb<String>,
    pub on_text_stream_start: Cb0,
    pub on_text_stream_stop: Cb0,

    // Audio side
    pub on_audio_chunk: Option<Arc<dyn Fn(&[u8]) + Send + Sync>>,
    pub on_audio_stream_start: Cb0,
    pub on_audio_stream_stop: Cb0,
    pub on_sentence_synthesized: Cb2<String, Duration>,

    // Playback control
    pub on_playback_start: Cb0,
    pub on_playback_stop: Cb0,
    pub on_playback_pause: Cb0,
    pub on_playback_resume: Cb0,
    pub on_playback_progress: Cb2<Duration, Duration>,

    // Engine lifecycle
    pub on_engine_ready: Cb<String>,
    pub on_engine_error: Option<Arc<dyn Fn(&str, &EngineError) + Send + Sync>>,
    pub on_engine_switch: Cb2<String, String>,
    pub on_engine_synthesis_start: Cb<String>,
    pub on_engine_synthesis_stop: Cb<String>,

    // System state
    pub on_buffer_full: Cb0,
    pub on_buffer_empty: Cb0,
    pub on_latency_warning: Cb<Duration>,
    pub on_error: Option<Arc<dyn Fn(&PipelineError) + Send + Sync>>,
}

fn guarded(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("Callback {} panicked; continuing", name);
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn character(&self, c: char) {
        if let Some(cb) = &self.on_character {
            guarded("on_character", || cb(c));
        }
    }

    pub(crate) fn word(&self, word: &str) {
        if let Some(cb) = &self.on_word {
            guarded("on_word", || cb(word.to_string()));
        }
    }

    pub(crate) fn sentence(&self, sentence: &str) {
        if let Some(cb) = &self.on_sentence {
            guarded("on_sentence", || cb(sentence.to_string()));
        }
    }

    pub(crate) fn text_stream_start(&self) {
        if let Some(cb) = &self.on_text_stream_start {
            guarded("on_text_stream_start", || cb());
        }
    }

    pub(crate) fn text_stream_stop(&self) {
        if let Some(cb) = &self.on_text_stream_stop {
            guarded("on_text_stream_stop", || cb());
        }
    }

    pub(crate) fn audio_chunk(&self, bytes: &[u8]) {
        if let Some(cb) = &self.on_audio_chunk {
            guarded("on_audio_chunk", || cb(bytes));
        }
    }

    pub(crate) fn audio_stream_start(&self) {
        if let Some(cb) = &self.on_audio_stream_start {
            guarded("on_audio_stream_start", || cb());
        }
    }

    pub(crate) fn audio_stream_stop(&self) {
        if let Some(cb) = &self.on_audio_stream_stop {
            guarded("on_audio_stream_stop", || cb());
        }
    }

    pub(crate) fn sentence_synthesized(&self, sentence: &str, duration: Duration) {
        if let Some(cb) = &self.on_sentence_synthesized {
            guarded("on_sentence_synthesized", || {
                cb(sentence.to_string(), duration)
            });
        }
    }

    pub(crate) fn playback_start(&self) {
        if let Some(cb) = &self.on_playback_start {
            guarded("on_playback_start", || cb());
        }
    }

    pub(crate) fn playback_stop(&self) {
        if let Some(cb) = &self.on_playback_stop {
            guarded("on_playback_stop", || cb());
        }
    }

    pub(crate) fn playback_pause(&self) {
        if let Some(cb) = &self.on_playback_pause {
            guarded("on_playback_pause", || cb());
        }
    }

    pub(crate) fn playback_resume(&self) {
        if let Some(cb) = &self.on_playback_resume {
            guarded("on_playback_resume", || cb());
        }
    }

    pub(crate) fn playback_progress(&self, elapsed: Duration, total: Duration) {
        if let Some(cb) = &self.on_playback_progress {
            guarded("on_playback_progress", || cb(elapsed, total));
        }
    }

    pub(crate) fn engine_ready(&self, name: &str) {
        if let Some(cb) = &self.on_engine_ready {
            guarded("on_engine_ready", || cb(name.to_string()));
        }
    }

    pub(crate) fn engine_error(&self, name: &str, error: &EngineError) {
        if let Some(cb) = &self.on_engine_error {
            guarded("on_engine_error", || cb(name, error));
        }
    }

    pub(crate) fn engine_switch(&self, from: &str, to: &str) {
        if let Some(cb) = &self.on_engine_switch {
            guarded("on_engine_switch", || cb(from.to_string(), to.to_string()));
        }
    }

    pub(crate) fn engine_synthesis_start(&self, name: &str) {
        if let Some(cb) = &self.on_engine_synthesis_start {
            guarded("on_engine_synthesis_start", || cb(name.to_string()));
        }
    }

    pub(crate) fn engine_synthesis_stop(&self, name: &str) {
        if let Some(cb) = &self.on_engine_synthesis_stop {
            guarded("on_engine_synthesis_stop", || cb(name.to_string()));
        }
    }

    pub(crate) fn buffer_full(&self) {
        if let Some(cb) = &self.on_buffer_full {
            guarded("on_buffer_full", || cb());
        }
    }

    pub(crate) fn buffer_empty(&self) {
        if let Some(cb) = &self.on_buffer_empty {
            guarded("on_buffer_empty", || cb());
        }
    }

    pub(crate) fn latency_warning(&self, duration: Duration) {
        if let Some(cb) = &self.on_latency_warning {
            guarded("on_latency_warning", || cb(duration));
        }
    }

    pub(crate) fn error(&self, error: &PipelineError) {
        if let Some(cb) = &self.on_error {
            guarded("on_error", || cb(error));
        }
    }
}
