//! Shared metrics for cross-thread pipeline monitoring.
//!
//! Counters are plain atomics so the synthesis task, the playback worker and
//! any observer can touch them without locking each other out.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Segmenter,
    Synthesis,
    Playback,
}

/// Shared metrics handle. Cloning is cheap; all clones observe the same
/// counters.
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    // Stage activity
    stage_segmenter: Arc<AtomicBool>,
    stage_synthesis: Arc<AtomicBool>,
    stage_playback: Arc<AtomicBool>,

    // Event counters
    units_segmented: Arc<AtomicU64>,
    sentences_synthesized: Arc<AtomicU64>,
    sentences_dropped: Arc<AtomicU64>,
    chunks_played: Arc<AtomicU64>,
    words_played: Arc<AtomicU64>,
    engine_failovers: Arc<AtomicU64>,
    engine_errors: Arc<AtomicU64>,
    buffer_underruns: Arc<AtomicU64>,

    // Buffer occupancy in milliseconds of audio (f64 seconds * 1000)
    buffered_audio_ms: Arc<AtomicU64>,

    last_synthesis: Arc<RwLock<Option<Instant>>>,
    last_playback: Arc<RwLock<Option<Instant>>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_stage_active(&self, stage: PipelineStage) {
        match stage {
            PipelineStage::Segmenter => self.stage_segmenter.store(true, Ordering::Relaxed),
            PipelineStage::Synthesis => {
                self.stage_synthesis.store(true, Ordering::Relaxed);
                *self.last_synthesis.write() = Some(Instant::now());
            }
            PipelineStage::Playback => {
                self.stage_playback.store(true, Ordering::Relaxed);
                *self.last_playback.write() = Some(Instant::now());
            }
        }
    }

    pub fn mark_playback_active(&self) {
        self.mark_stage_active(PipelineStage::Playback);
    }

    pub fn stage_active(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::Segmenter => self.stage_segmenter.load(Ordering::Relaxed),
            PipelineStage::Synthesis => self.stage_synthesis.load(Ordering::Relaxed),
            PipelineStage::Playback => self.stage_playback.load(Ordering::Relaxed),
        }
    }

    pub fn incr_units_segmented(&self) {
        self.units_segmented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sentences_synthesized(&self) {
        self.sentences_synthesized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sentences_dropped(&self) {
        self.sentences_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_chunks_played(&self) {
        self.chunks_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_words_played(&self) {
        self.words_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_engine_failovers(&self) {
        self.engine_failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_engine_errors(&self) {
        self.engine_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_buffer_underruns(&self) {
        self.buffer_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_buffered_seconds(&self, seconds: f64) {
        self.buffered_audio_ms
            .store((seconds.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_segmented: self.units_segmented.load(Ordering::Relaxed),
            sentences_synthesized: self.sentences_synthesized.load(Ordering::Relaxed),
            sentences_dropped: self.sentences_dropped.load(Ordering::Relaxed),
            chunks_played: self.chunks_played.load(Ordering::Relaxed),
            words_played: self.words_played.load(Ordering::Relaxed),
            engine_failovers: self.engine_failovers.load(Ordering::Relaxed),
            engine_errors: self.engine_errors.load(Ordering::Relaxed),
            buffer_underruns: self.buffer_underruns.load(Ordering::Relaxed),
            buffered_seconds: self.buffered_audio_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub units_segmented: u64,
    pub sentences_synthesized: u64,
    pub sentences_dropped: u64,
    pub chunks_played: u64,
    pub words_played: u64,
    pub engine_failovers: u64,
    pub engine_errors: u64,
    pub buffer_underruns: u64,
    pub buffered_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let clone = metrics.clone();
        metrics.incr_chunks_played();
        clone.incr_chunks_played();
        assert_eq!(metrics.snapshot().chunks_played, 2);
    }

    #[test]
    fn stage_marking() {
        let metrics = PipelineMetrics::new();
        assert!(!metrics.stage_active(PipelineStage::Playback));
        metrics.mark_playback_active();
        assert!(metrics.stage_active(PipelineStage::Playback));
        assert!(!metrics.stage_active(PipelineStage::Synthesis));
    }

    #[test]
    fn buffered_seconds_round_trip() {
        let metrics = PipelineMetrics::new();
        metrics.update_buffered_seconds(1.25);
        assert!((metrics.snapshot().buffered_seconds - 1.25).abs() < 1e-9);
        metrics.update_buffered_seconds(-3.0);
        assert_eq!(metrics.snapshot().buffered_seconds, 0.0);
    }
}
