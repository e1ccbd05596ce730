//! The engine contract and the shared plumbing concrete engines compose.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamvox_audio::{AudioBuffer, AudioConfiguration, TimingInfo};
use streamvox_foundation::{BufferError, CancelToken};

use crate::error::{EngineError, EngineResult};
use crate::types::{EngineInfo, EngineStatus, EngineStatusCell, Voice};

/// A TTS engine. Engines stream PCM into the buffer injected via
/// `set_audio_buffer`; they never allocate their own.
///
/// `synthesize` must observe `cancel` at least between chunks and must
/// deliver PCM matching the `AudioConfiguration` it was initialized with,
/// in chunks of at most one second of audio.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    fn info(&self) -> EngineInfo;

    fn status(&self) -> EngineStatus;

    async fn initialize(&mut self, config: &AudioConfiguration) -> EngineResult<()>;

    async fn is_available(&self) -> bool;

    async fn voices(&self) -> EngineResult<Vec<Voice>>;

    /// Idempotent; an unknown voice fails without side effect.
    async fn set_voice(&mut self, voice_id: &str) -> EngineResult<()>;

    /// Idempotent; an invalid parameter fails without side effect.
    async fn set_parameters(&mut self, params: HashMap<String, String>) -> EngineResult<()>;

    /// Inject the shared audio buffer. Called by the orchestrator before
    /// the first `synthesize`.
    fn set_audio_buffer(&mut self, buffer: Arc<AudioBuffer>);

    /// Synthesize one unit, enqueueing PCM (and optional timings) through
    /// the shared buffer. Returns once the unit is fully enqueued.
    async fn synthesize(&mut self, text: &str, cancel: &CancelToken) -> EngineResult<()>;

    /// Cooperative cancel; subsequent `synthesize` calls fail with
    /// `Stopped` until `initialize` runs again.
    async fn stop(&mut self) -> EngineResult<()>;

    async fn shutdown(&mut self) -> EngineResult<()>;
}

/// Shared plumbing for engine implementations: status cell, injected buffer
/// slot and the stop latch. Concrete engines hold one of these and delegate.
pub struct EngineCore {
    name: String,
    status: EngineStatusCell,
    buffer: RwLock<Option<Arc<AudioBuffer>>>,
    stopped: AtomicBool,
}

impl EngineCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: EngineStatusCell::new(),
            buffer: RwLock::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> EngineStatus {
        self.status.get()
    }

    pub fn set_status(&self, status: EngineStatus) -> bool {
        self.status.set(status)
    }

    pub fn attach_buffer(&self, buffer: Arc<AudioBuffer>) {
        *self.buffer.write() = Some(buffer);
    }

    pub fn buffer(&self) -> EngineResult<Arc<AudioBuffer>> {
        self.buffer.read().clone().ok_or(EngineError::NoBuffer)
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Bail-out check used between chunks.
    pub fn check_live(&self, cancel: &CancelToken) -> EngineResult<()> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Enqueue one PCM chunk through the injected buffer. Blocks under
    /// backpressure; maps a closed buffer to `BufferClosed`.
    pub fn enqueue_pcm(&self, bytes: Vec<u8>, cancel: &CancelToken) -> EngineResult<()> {
        self.check_live(cancel)?;
        match self.buffer()?.put_pcm(bytes) {
            Ok(()) => Ok(()),
            Err(BufferError::Closed) => Err(EngineError::BufferClosed),
            Err(e) => Err(EngineError::EngineSpecific {
                engine: self.name.clone(),
                message: format!("buffer rejected PCM: {e}"),
            }),
        }
    }

    /// Best-effort timing enqueue; drops are not errors.
    pub fn enqueue_timing(&self, timing: TimingInfo) {
        if let Ok(buffer) = self.buffer() {
            let _ = buffer.put_timing(timing);
        }
    }

    /// Split a PCM blob into chunks of at most `chunk_bytes` (frame-aligned)
    /// and enqueue them with cancellation checks between chunks.
    pub fn enqueue_chunked(
        &self,
        pcm: &[u8],
        config: &AudioConfiguration,
        cancel: &CancelToken,
    ) -> EngineResult<()> {
        let bytes_per_frame = config.bytes_per_frame();
        let mut chunk_bytes = config.resolved_playout_chunk_size();
        // Keep each chunk under one second of audio so buffer accounting
        // stays responsive.
        chunk_bytes = chunk_bytes.min(config.bytes_per_second());
        chunk_bytes = chunk_bytes.max(bytes_per_frame);
        chunk_bytes -= chunk_bytes % bytes_per_frame;

        for chunk in pcm.chunks(chunk_bytes) {
            self.enqueue_pcm(chunk.to_vec(), cancel)?;
        }
        Ok(())
    }
}

/// Evenly spread per-word timings across an utterance of known duration.
/// Engines without real timing data use this approximation.
pub fn approximate_timings(text: &str, total: Duration) -> Vec<TimingInfo> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || total.is_zero() {
        return Vec::new();
    }
    let per_word = total / words.len() as u32;
    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let start = per_word * i as u32;
            TimingInfo::new(*word, start, start + per_word)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_requires_buffer() {
        let core = EngineCore::new("test");
        assert!(matches!(core.buffer(), Err(EngineError::NoBuffer)));
    }

    #[test]
    fn stop_latch_blocks_enqueue() {
        let core = EngineCore::new("test");
        let config = AudioConfiguration::default();
        core.attach_buffer(Arc::new(AudioBuffer::new(&config, 2.0)));
        core.request_stop();
        let err = core
            .enqueue_pcm(vec![0u8; 4], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Stopped));
        core.clear_stop();
        assert!(core.enqueue_pcm(vec![0u8; 4], &CancelToken::new()).is_ok());
    }

    #[test]
    fn cancel_blocks_enqueue() {
        let core = EngineCore::new("test");
        let config = AudioConfiguration::default();
        core.attach_buffer(Arc::new(AudioBuffer::new(&config, 2.0)));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            core.enqueue_pcm(vec![0u8; 4], &cancel),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn chunked_enqueue_is_frame_aligned() {
        let core = EngineCore::new("test");
        let config = AudioConfiguration {
            playout_chunk_size: Some(100),
            ..AudioConfiguration::default()
        };
        let buffer = Arc::new(AudioBuffer::new(&config, 2.0));
        core.attach_buffer(buffer.clone());

        core.enqueue_chunked(&vec![0u8; 350], &config, &CancelToken::new())
            .unwrap();
        let stats = buffer.stats();
        // 350 bytes in 100-byte chunks: 3 full + 1 remainder
        assert_eq!(stats.audio_queue_len, 4);
        assert_eq!(stats.total_samples, 175);
    }

    #[test]
    fn approximate_timings_cover_the_utterance() {
        let timings = approximate_timings("one two three", Duration::from_millis(900));
        assert_eq!(timings.len(), 3);
        assert_eq!(timings[0].start, Duration::ZERO);
        assert_eq!(timings[2].end, Duration::from_millis(900));
        for timing in &timings {
            assert_eq!(timing.duration(), Duration::from_millis(300));
        }
    }

    #[test]
    fn approximate_timings_empty_input() {
        assert!(approximate_timings("   ", Duration::from_secs(1)).is_empty());
        assert!(approximate_timings("word", Duration::ZERO).is_empty());
    }
}
