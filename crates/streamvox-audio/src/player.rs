//! Stream player: pulls PCM from the shared buffer on a fixed tick and keeps
//! the output device primed.
//!
//! The worker runs on a dedicated named thread. Control is via three
//! channels (stop, pause, resume); pause parks the worker until resume or
//! stop, so a paused session consumes nothing and backpressure propagates
//! all the way to the synthesizing engine.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use streamvox_foundation::{AudioError, BufferError, CancelToken, PlayerError};
use streamvox_telemetry::PipelineMetrics;
use tracing::{debug, info, warn};

use crate::buffer::AudioBuffer;
use crate::config::{AudioConfiguration, TimingInfo};
use crate::convert;
use crate::output::SinkFactory;
use crate::wav_tap::WavTap;

const TICK_INTERVAL: Duration = Duration::from_millis(5);
const GET_TIMEOUT: Duration = Duration::from_millis(200);
const START_TIMEOUT: Duration = Duration::from_secs(3);
const DRAIN_POLL: Duration = Duration::from_millis(100);
const DRAIN_INACTIVITY_WINDOW: Duration = Duration::from_secs(3);
const DRAIN_HARDWARE_GRACE: Duration = Duration::from_secs(1);

/// Snapshot of playback counters. All counters are monotonic within a
/// session and reset when a new session starts.
#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub bytes_played: u64,
    pub chunks_played: u64,
    pub words_played: u64,
    pub playback_duration: Duration,
    pub started_at: Option<Instant>,
    pub last_activity: Option<Instant>,
}

#[derive(Default)]
struct StatsInner {
    bytes_played: AtomicU64,
    chunks_played: AtomicU64,
    words_played: AtomicU64,
    started_at: RwLock<Option<Instant>>,
    last_activity: RwLock<Option<Instant>>,
}

impl StatsInner {
    fn reset(&self, now: Instant) {
        self.bytes_played.store(0, Ordering::SeqCst);
        self.chunks_played.store(0, Ordering::SeqCst);
        self.words_played.store(0, Ordering::SeqCst);
        *self.started_at.write() = Some(now);
        *self.last_activity.write() = Some(now);
    }

    fn snapshot(&self) -> PlaybackStats {
        let started_at = *self.started_at.read();
        PlaybackStats {
            bytes_played: self.bytes_played.load(Ordering::SeqCst),
            chunks_played: self.chunks_played.load(Ordering::SeqCst),
            words_played: self.words_played.load(Ordering::SeqCst),
            playback_duration: started_at.map(|t| t.elapsed()).unwrap_or_default(),
            started_at,
            last_activity: *self.last_activity.read(),
        }
    }
}

/// Lifecycle callbacks invoked from the playback worker thread. Handlers
/// must not block; they run on the audio path.
#[derive(Clone, Default)]
pub struct PlayerCallbacks {
    pub on_audio_chunk: Option<Arc<dyn Fn(&[u8]) + Send + Sync>>,
    pub on_word: Option<Arc<dyn Fn(&TimingInfo) + Send + Sync>>,
    pub on_playback_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_playback_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_playback_pause: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_playback_resume: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct Session {
    stop_tx: Sender<()>,
    pause_tx: Sender<()>,
    resume_tx: Sender<()>,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

pub struct StreamPlayer {
    buffer: Arc<AudioBuffer>,
    config: AudioConfiguration,
    sink_factory: SinkFactory,
    callbacks: Arc<RwLock<PlayerCallbacks>>,
    stats: Arc<StatsInner>,
    volume: Arc<RwLock<f64>>,
    muted: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
    wav_tap_path: Option<PathBuf>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl StreamPlayer {
    pub fn new(
        buffer: Arc<AudioBuffer>,
        config: AudioConfiguration,
        sink_factory: SinkFactory,
    ) -> Self {
        let volume = config.volume;
        let muted = config.muted;
        Self {
            buffer,
            config,
            sink_factory,
            callbacks: Arc::new(RwLock::new(PlayerCallbacks::default())),
            stats: Arc::new(StatsInner::default()),
            volume: Arc::new(RwLock::new(volume)),
            muted: Arc::new(AtomicBool::new(muted)),
            active: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
            wav_tap_path: None,
            metrics: None,
        }
    }

    pub fn with_wav_tap(mut self, path: Option<PathBuf>) -> Self {
        self.wav_tap_path = path;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn set_callbacks(&self, callbacks: PlayerCallbacks) {
        *self.callbacks.write() = callbacks;
    }

    /// Open the device and spawn the playback worker. Re-armable after a
    /// previous `stop`; counters reset for the new session.
    pub fn start(&self) -> Result<(), PlayerError> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(PlayerError::AlreadyPlaying);
        }

        let (stop_tx, stop_rx) = bounded(1);
        let (pause_tx, pause_rx) = bounded(1);
        let (resume_tx, resume_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded::<Result<u32, AudioError>>(1);
        let cancel = CancelToken::new();

        let worker = Worker {
            buffer: self.buffer.clone(),
            config: self.config.clone(),
            sink_factory: self.sink_factory.clone(),
            callbacks: self.callbacks.clone(),
            stats: self.stats.clone(),
            volume: self.volume.clone(),
            muted: self.muted.clone(),
            cancel: cancel.clone(),
            wav_tap_path: self.wav_tap_path.clone(),
            metrics: self.metrics.clone(),
        };

        let handle = thread::Builder::new()
            .name("stream-player".to_string())
            .spawn(move || worker.run(stop_rx, pause_rx, resume_rx, ready_tx))
            .map_err(|e| PlayerError::Audio(AudioError::Fatal(format!("spawn worker: {e}"))))?;

        // The sink is created on the worker thread; wait for it to report.
        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(rate)) => {
                debug!("Playback session started at {} Hz", rate);
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(PlayerError::Audio(e));
            }
            Err(_) => {
                cancel.cancel();
                let _ = stop_tx.send(());
                let _ = handle.join();
                return Err(PlayerError::WorkerStuck {
                    timeout: START_TIMEOUT,
                });
            }
        }

        self.stats.reset(Instant::now());
        self.active.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        *session = Some(Session {
            stop_tx,
            pause_tx,
            resume_tx,
            cancel,
            handle,
        });
        drop(session);

        if let Some(cb) = &self.callbacks.read().on_playback_start {
            cb();
        }
        Ok(())
    }

    /// Stop the current session, join the worker and clear the buffer.
    /// Fires `on_playback_stop` exactly once per session.
    pub fn stop(&self) -> Result<(), PlayerError> {
        let session = {
            let mut guard = self.session.lock();
            guard.take().ok_or(PlayerError::NotPlaying)?
        };

        session.cancel.cancel();
        let _ = session.stop_tx.send(());
        if session.handle.join().is_err() {
            warn!("Playback worker panicked during shutdown");
        }

        self.active.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.buffer.clear();

        if let Some(cb) = &self.callbacks.read().on_playback_stop {
            cb();
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(PlayerError::NotPlaying);
        }
        if self.paused.swap(true, Ordering::SeqCst) {
            return Err(PlayerError::AlreadyPaused);
        }
        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.pause_tx.try_send(());
        }
        if let Some(cb) = &self.callbacks.read().on_playback_pause {
            cb();
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), PlayerError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(PlayerError::NotPlaying);
        }
        if !self.paused.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::NotPaused);
        }
        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.resume_tx.try_send(());
        }
        if let Some(cb) = &self.callbacks.read().on_playback_resume {
            cb();
        }
        Ok(())
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn set_volume(&self, volume: f64) -> Result<(), AudioError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(AudioError::InvalidVolume { volume });
        }
        *self.volume.write() = volume;
        Ok(())
    }

    pub fn volume(&self) -> f64 {
        *self.volume.read()
    }

    pub fn is_playing(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.paused.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.buffer.buffered_seconds()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats.snapshot()
    }

    /// Block until playback has truly finished: no worker activity for the
    /// inactivity window, then one extra grace period for the device's
    /// internal queue.
    pub fn wait_for_playback_complete(&self, timeout: Duration) -> Result<(), PlayerError> {
        self.wait_for_playback_complete_with(timeout, DRAIN_INACTIVITY_WINDOW, DRAIN_HARDWARE_GRACE)
    }

    pub fn wait_for_playback_complete_with(
        &self,
        timeout: Duration,
        inactivity_window: Duration,
        hardware_grace: Duration,
    ) -> Result<(), PlayerError> {
        let start = Instant::now();
        let mut observed_activity = *self.stats.last_activity.read();
        let mut quiet_since: Option<Instant> = None;

        loop {
            if !self.active.load(Ordering::SeqCst) {
                return Ok(());
            }

            let current = *self.stats.last_activity.read();
            if current != observed_activity {
                observed_activity = current;
                quiet_since = None;
            } else if quiet_since.is_none() && self.buffer.total_samples() == 0 {
                quiet_since = Some(Instant::now());
                debug!("No playback activity; waiting for the device queue to drain");
            }

            if let Some(since) = quiet_since {
                if since.elapsed() >= inactivity_window {
                    thread::sleep(hardware_grace);
                    info!(
                        "Playback complete: {} bytes played",
                        self.stats.bytes_played.load(Ordering::SeqCst)
                    );
                    return Ok(());
                }
            }

            if start.elapsed() > timeout {
                return Err(PlayerError::DrainTimeout { timeout });
            }
            thread::sleep(DRAIN_POLL);
        }
    }
}

struct Worker {
    buffer: Arc<AudioBuffer>,
    config: AudioConfiguration,
    sink_factory: SinkFactory,
    callbacks: Arc<RwLock<PlayerCallbacks>>,
    stats: Arc<StatsInner>,
    volume: Arc<RwLock<f64>>,
    muted: Arc<AtomicBool>,
    cancel: CancelToken,
    wav_tap_path: Option<PathBuf>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Worker {
    fn run(
        self,
        stop_rx: Receiver<()>,
        pause_rx: Receiver<()>,
        resume_rx: Receiver<()>,
        ready_tx: Sender<Result<u32, AudioError>>,
    ) {
        let mut sink = match (self.sink_factory)(&self.config, self.cancel.clone()) {
            Ok(sink) => {
                let _ = ready_tx.send(Ok(sink.sample_rate()));
                sink
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let mut tap = self.wav_tap_path.as_ref().and_then(|path| {
            match WavTap::create(path, &self.config) {
                Ok(tap) => Some(tap),
                Err(e) => {
                    warn!("WAV tap disabled: {}", e);
                    None
                }
            }
        });

        info!("Playback worker started");
        let ticker = crossbeam_channel::tick(TICK_INTERVAL);
        let mut convert_buf: Vec<f32> = Vec::new();

        loop {
            // Control signals win over the tick when both are ready.
            if stop_rx.try_recv().is_ok() || self.cancel.is_cancelled() {
                debug!("Playback worker received stop");
                break;
            }
            if pause_rx.try_recv().is_ok() {
                debug!("Playback worker paused");
                crossbeam_channel::select! {
                    recv(resume_rx) -> _ => {
                        debug!("Playback worker resumed");
                        continue;
                    }
                    recv(stop_rx) -> _ => {
                        debug!("Playback worker stopped while paused");
                        break;
                    }
                }
            }

            crossbeam_channel::select! {
                recv(stop_rx) -> _ => {
                    debug!("Playback worker received stop");
                    break;
                }
                recv(pause_rx) -> _ => {
                    debug!("Playback worker paused");
                    crossbeam_channel::select! {
                        recv(resume_rx) -> _ => {
                            debug!("Playback worker resumed");
                            continue;
                        }
                        recv(stop_rx) -> _ => {
                            debug!("Playback worker stopped while paused");
                            break;
                        }
                    }
                }
                recv(ticker) -> _ => {
                    match self.buffer.get_pcm(GET_TIMEOUT) {
                        Ok(bytes) => {
                            self.play_chunk(&bytes, sink.as_mut(), tap.as_mut(), &mut convert_buf);
                            self.drain_timings();
                        }
                        // Underrun: the producer is behind, keep ticking.
                        Err(BufferError::Timeout) => {
                            if let Some(metrics) = &self.metrics {
                                metrics.incr_buffer_underruns();
                            }
                        }
                        Err(_) => {
                            debug!("Buffer closed, playback worker exiting");
                            break;
                        }
                    }
                }
            }
        }

        if let Some(tap) = tap.as_mut() {
            if let Err(e) = tap.finalize() {
                warn!("WAV tap finalize failed: {}", e);
            }
        }
        if let Err(e) = sink.close() {
            warn!("Sink close failed: {}", e);
        }
        info!("Playback worker stopped");
    }

    fn play_chunk(
        &self,
        bytes: &[u8],
        sink: &mut dyn crate::output::AudioSink,
        tap: Option<&mut WavTap>,
        convert_buf: &mut Vec<f32>,
    ) {
        if let Some(tap) = tap {
            if let Err(e) = tap.write(bytes) {
                warn!("WAV tap write failed: {}", e);
            }
        }

        convert::pcm_to_f32(bytes, self.config.bits_per_sample, convert_buf);

        // Muted playback still consumes and accounts for bytes so pacing and
        // drain detection behave identically to audible playback.
        if self.muted.load(Ordering::SeqCst) {
            convert_buf.iter_mut().for_each(|s| *s = 0.0);
        } else {
            let volume = *self.volume.read() as f32;
            if volume < 1.0 {
                convert_buf.iter_mut().for_each(|s| *s *= volume);
            }
        }

        if let Err(e) = sink.write(convert_buf) {
            warn!("Device write failed: {}", e);
            return;
        }

        self.stats
            .bytes_played
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);
        self.stats.chunks_played.fetch_add(1, Ordering::SeqCst);
        *self.stats.last_activity.write() = Some(Instant::now());

        if let Some(metrics) = &self.metrics {
            metrics.mark_playback_active();
            metrics.incr_chunks_played();
        }

        if let Some(cb) = &self.callbacks.read().on_audio_chunk {
            cb(bytes);
        }
    }

    fn drain_timings(&self) {
        while let Ok(timing) = self.buffer.get_timing(Duration::ZERO) {
            self.stats.words_played.fetch_add(1, Ordering::SeqCst);
            if let Some(metrics) = &self.metrics {
                metrics.incr_words_played();
            }
            if let Some(cb) = &self.callbacks.read().on_word {
                cb(&timing);
            }
        }
    }
}
