//! Shared PCM buffer between the synthesis side and the playback worker.
//!
//! Two bounded FIFOs (PCM chunks and word timings) plus an atomic frame
//! counter. `put_pcm` blocks when either the chunk capacity or the logical
//! buffered-seconds cap is hit; that blocking is the pipeline's entire
//! backpressure mechanism. `get_pcm` blocks up to its timeout; timing out is
//! a normal underrun while the producer is still synthesizing.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use streamvox_foundation::BufferError;
use tracing::trace;

use crate::config::{AudioConfiguration, TimingInfo};

/// How many buffer-threshold windows of audio may sit in the buffer before
/// producers block.
const SECONDS_CAP_FACTOR: f64 = 4.0;

const DEFAULT_CAPACITY_CHUNKS: usize = 1000;
const DEFAULT_TIMING_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferStats {
    pub total_samples: u64,
    pub buffered_seconds: f64,
    pub audio_queue_len: usize,
    pub timing_queue_len: usize,
}

struct Queues {
    pcm: VecDeque<Vec<u8>>,
    timings: VecDeque<TimingInfo>,
    closed: bool,
}

pub struct AudioBuffer {
    queues: Mutex<Queues>,
    space_available: Condvar,
    data_available: Condvar,
    /// Frames buffered but not yet handed to the device.
    total_samples: AtomicU64,
    capacity_chunks: usize,
    timing_capacity: usize,
    max_buffered_seconds: f64,
    bytes_per_frame: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(config: &AudioConfiguration, buffer_threshold_seconds: f64) -> Self {
        Self::with_capacity(config, buffer_threshold_seconds, DEFAULT_CAPACITY_CHUNKS)
    }

    pub fn with_capacity(
        config: &AudioConfiguration,
        buffer_threshold_seconds: f64,
        capacity_chunks: usize,
    ) -> Self {
        Self {
            queues: Mutex::new(Queues {
                pcm: VecDeque::new(),
                timings: VecDeque::new(),
                closed: false,
            }),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
            total_samples: AtomicU64::new(0),
            capacity_chunks,
            timing_capacity: DEFAULT_TIMING_CAPACITY,
            max_buffered_seconds: buffer_threshold_seconds * SECONDS_CAP_FACTOR,
            bytes_per_frame: config.bytes_per_frame(),
            sample_rate: config.sample_rate,
        }
    }

    /// Enqueue a PCM chunk, blocking while the buffer is at capacity.
    pub fn put_pcm(&self, bytes: Vec<u8>) -> Result<(), BufferError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let frames = (bytes.len() / self.bytes_per_frame) as u64;
        let mut queues = self.queues.lock();
        loop {
            if queues.closed {
                return Err(BufferError::Closed);
            }
            if queues.pcm.len() < self.capacity_chunks
                && self.buffered_seconds() < self.max_buffered_seconds
            {
                break;
            }
            self.space_available.wait(&mut queues);
        }
        queues.pcm.push_back(bytes);
        self.total_samples.fetch_add(frames, Ordering::SeqCst);
        drop(queues);
        self.data_available.notify_one();
        Ok(())
    }

    /// Enqueue a word timing. Best-effort: a full timing queue drops the
    /// entry rather than stalling synthesis.
    pub fn put_timing(&self, timing: TimingInfo) -> Result<(), BufferError> {
        let mut queues = self.queues.lock();
        if queues.closed {
            return Err(BufferError::Closed);
        }
        if queues.timings.len() >= self.timing_capacity {
            trace!("Timing queue full, dropping entry for {:?}", timing.word);
            return Err(BufferError::Full);
        }
        queues.timings.push_back(timing);
        drop(queues);
        self.data_available.notify_all();
        Ok(())
    }

    /// Dequeue the next PCM chunk, waiting up to `timeout`.
    pub fn get_pcm(&self, timeout: Duration) -> Result<Vec<u8>, BufferError> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if let Some(bytes) = queues.pcm.pop_front() {
                let frames = (bytes.len() / self.bytes_per_frame) as u64;
                self.total_samples.fetch_sub(frames, Ordering::SeqCst);
                drop(queues);
                self.space_available.notify_one();
                return Ok(bytes);
            }
            if queues.closed {
                return Err(BufferError::Closed);
            }
            if self.data_available.wait_until(&mut queues, deadline).timed_out() {
                return if queues.closed {
                    Err(BufferError::Closed)
                } else {
                    Err(BufferError::Timeout)
                };
            }
        }
    }

    /// Dequeue the next word timing, waiting up to `timeout`.
    pub fn get_timing(&self, timeout: Duration) -> Result<TimingInfo, BufferError> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if let Some(timing) = queues.timings.pop_front() {
                return Ok(timing);
            }
            if queues.closed {
                return Err(BufferError::Closed);
            }
            if timeout.is_zero()
                || self.data_available.wait_until(&mut queues, deadline).timed_out()
            {
                return Err(BufferError::Timeout);
            }
        }
    }

    /// Seconds of audio currently buffered. O(1); never negative.
    pub fn buffered_seconds(&self) -> f64 {
        self.total_samples.load(Ordering::SeqCst) as f64 / self.sample_rate as f64
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::SeqCst)
    }

    /// Drop everything buffered. Unblocks any producer waiting for space.
    pub fn clear(&self) {
        let mut queues = self.queues.lock();
        queues.pcm.clear();
        queues.timings.clear();
        self.total_samples.store(0, Ordering::SeqCst);
        drop(queues);
        self.space_available.notify_all();
    }

    /// Drop pending timings only. Used when the engine producing them is
    /// swapped out mid-stream; their audio will never play.
    pub fn clear_timings(&self) {
        self.queues.lock().timings.clear();
    }

    /// Terminal. Pending data is discarded; blocked producers and consumers
    /// wake with `Closed`.
    pub fn close(&self) {
        let mut queues = self.queues.lock();
        if queues.closed {
            return;
        }
        queues.closed = true;
        queues.pcm.clear();
        queues.timings.clear();
        self.total_samples.store(0, Ordering::SeqCst);
        drop(queues);
        self.space_available.notify_all();
        self.data_available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.queues.lock().closed
    }

    pub fn stats(&self) -> BufferStats {
        let queues = self.queues.lock();
        let total_samples = self.total_samples.load(Ordering::SeqCst);
        BufferStats {
            total_samples,
            buffered_seconds: total_samples as f64 / self.sample_rate as f64,
            audio_queue_len: queues.pcm.len(),
            timing_queue_len: queues.timings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn small_buffer(capacity: usize) -> AudioBuffer {
        AudioBuffer::with_capacity(&AudioConfiguration::default(), 2.0, capacity)
    }

    #[test]
    fn put_get_round_trip_updates_samples() {
        let buffer = small_buffer(8);
        buffer.put_pcm(vec![0u8; 640]).unwrap();
        // 640 bytes / 2 bytes per frame = 320 frames at 16 kHz
        assert_eq!(buffer.total_samples(), 320);
        assert!((buffer.buffered_seconds() - 0.02).abs() < 1e-9);

        let chunk = buffer.get_pcm(Duration::from_millis(10)).unwrap();
        assert_eq!(chunk.len(), 640);
        assert_eq!(buffer.total_samples(), 0);
        assert_eq!(buffer.buffered_seconds(), 0.0);
    }

    #[test]
    fn get_times_out_when_empty() {
        let buffer = small_buffer(8);
        let start = Instant::now();
        let err = buffer.get_pcm(Duration::from_millis(50)).unwrap_err();
        assert_eq!(err, BufferError::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn put_blocks_at_capacity_and_unblocks_on_get() {
        let buffer = Arc::new(small_buffer(2));
        buffer.put_pcm(vec![0u8; 64]).unwrap();
        buffer.put_pcm(vec![0u8; 64]).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let start = Instant::now();
                buffer.put_pcm(vec![1u8; 64]).unwrap();
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(50));
        buffer.get_pcm(Duration::from_millis(10)).unwrap();
        let blocked_for = producer.join().unwrap();
        assert!(blocked_for >= Duration::from_millis(40));
        assert_eq!(buffer.stats().audio_queue_len, 2);
    }

    #[test]
    fn put_blocks_on_seconds_cap() {
        // threshold 0.01 s * factor 4 = 0.04 s cap; one 0.05 s chunk exceeds it.
        let buffer = Arc::new(AudioBuffer::with_capacity(
            &AudioConfiguration::default(),
            0.01,
            1000,
        ));
        buffer.put_pcm(vec![0u8; 1600]).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.put_pcm(vec![0u8; 64]))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        buffer.get_pcm(Duration::from_millis(10)).unwrap();
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn clear_resets_accounting_and_unblocks_producers() {
        let buffer = Arc::new(small_buffer(1));
        buffer.put_pcm(vec![0u8; 64]).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.put_pcm(vec![0u8; 64]))
        };
        thread::sleep(Duration::from_millis(20));
        buffer.clear();
        producer.join().unwrap().unwrap();

        buffer.clear();
        assert_eq!(buffer.total_samples(), 0);
        let stats = buffer.stats();
        assert_eq!(stats.audio_queue_len, 0);
        assert_eq!(stats.timing_queue_len, 0);
    }

    #[test]
    fn close_wakes_consumer_with_closed() {
        let buffer = Arc::new(small_buffer(8));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.get_pcm(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        buffer.close();
        assert_eq!(consumer.join().unwrap().unwrap_err(), BufferError::Closed);
        assert_eq!(buffer.put_pcm(vec![0u8; 2]).unwrap_err(), BufferError::Closed);
    }

    #[test]
    fn timings_are_best_effort() {
        let buffer = small_buffer(8);
        for i in 0..DEFAULT_TIMING_CAPACITY {
            buffer
                .put_timing(TimingInfo::new(
                    format!("w{i}"),
                    Duration::ZERO,
                    Duration::from_millis(10),
                ))
                .unwrap();
        }
        let overflow = buffer.put_timing(TimingInfo::new(
            "dropped",
            Duration::ZERO,
            Duration::from_millis(10),
        ));
        assert_eq!(overflow.unwrap_err(), BufferError::Full);

        let first = buffer.get_timing(Duration::from_millis(5)).unwrap();
        assert_eq!(first.word, "w0");
    }

    #[test]
    fn clear_timings_leaves_pcm_untouched() {
        let buffer = small_buffer(8);
        buffer.put_pcm(vec![0u8; 64]).unwrap();
        buffer
            .put_timing(TimingInfo::new("w", Duration::ZERO, Duration::ZERO))
            .unwrap();
        buffer.clear_timings();
        let stats = buffer.stats();
        assert_eq!(stats.timing_queue_len, 0);
        assert_eq!(stats.audio_queue_len, 1);
        assert_eq!(stats.total_samples, 32);
    }
}
