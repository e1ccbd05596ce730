//! The `TextToAudioStream` orchestrator.
//!
//! Ties the segmenter, the engine set, the shared buffer and the stream
//! player together under one cancellation and backpressure discipline. Text
//! fed in is segmented into units; each unit is synthesized by the current
//! engine (with round-robin failover on error) into the shared buffer, which
//! the player drains to the device in real time.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamvox_audio::{
    AudioBuffer, AudioConfiguration, BufferStats, PlaybackStats, PlayerCallbacks, SinkFactory,
    StreamPlayer,
};
use streamvox_foundation::{CancelToken, PipelineError, PipelineState, PlayerError, StateManager};
use streamvox_telemetry::{MetricsSnapshot, PipelineMetrics, PipelineStage};
use streamvox_text::{SegmenterConfig, SentenceSegmenter};
use streamvox_tts::{EngineStatus, TtsEngine};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::callbacks::Callbacks;
use crate::config::StreamConfig;

/// Idle time after the last feed before unterminated trailing text is
/// flushed as a final unit.
const FLUSH_IDLE: Duration = Duration::from_millis(500);
/// Poll interval of the synthesis loop while the segmenter is empty.
const IDLE_POLL: Duration = Duration::from_millis(20);
/// Backoff before retrying the only configured engine.
const SINGLE_ENGINE_BACKOFF: Duration = Duration::from_millis(200);

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(20);

// Buffer fill edge states for OnBufferEmpty / OnBufferFull.
const FILL_UNKNOWN: u8 = 0;
const FILL_EMPTY: u8 = 1;
const FILL_MID: u8 = 2;
const FILL_FULL: u8 = 3;

#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub is_playing: bool,
    pub is_paused: bool,
    pub current_engine: String,
    pub engine_count: usize,
    pub player: PlaybackStats,
}

enum UnitOutcome {
    Synthesized(Duration),
    Cancelled,
    Dropped,
}

pub struct TextToAudioStream {
    config: StreamConfig,
    audio: AudioConfiguration,
    buffer: Arc<AudioBuffer>,
    player: Arc<StreamPlayer>,
    segmenter: Mutex<SentenceSegmenter>,
    last_feed: RwLock<Instant>,
    callbacks: Arc<RwLock<Callbacks>>,
    engines: AsyncMutex<Vec<Box<dyn TtsEngine>>>,
    engine_names: RwLock<Vec<String>>,
    current_engine: AtomicUsize,
    state: StateManager,
    cancel: Mutex<Option<CancelToken>>,
    synthesis_task: Mutex<Option<JoinHandle<()>>>,
    text_stream_active: AtomicBool,
    metrics: Arc<PipelineMetrics>,
    closed: AtomicBool,
}

impl TextToAudioStream {
    /// Build a pipeline playing through the default cpal output device.
    pub fn new(
        engines: Vec<Box<dyn TtsEngine>>,
        config: StreamConfig,
    ) -> Result<Arc<Self>, PipelineError> {
        Self::with_sink_factory(engines, config, streamvox_audio::cpal_sink_factory())
    }

    /// Build a pipeline with a custom device seam (tests, headless runs).
    pub fn with_sink_factory(
        mut engines: Vec<Box<dyn TtsEngine>>,
        config: StreamConfig,
        sink_factory: SinkFactory,
    ) -> Result<Arc<Self>, PipelineError> {
        if engines.is_empty() {
            return Err(PipelineError::NoEngines);
        }
        let audio = config.effective_audio();
        audio.validate()?;

        let metrics = Arc::new(PipelineMetrics::new());
        let buffer = Arc::new(AudioBuffer::new(&audio, config.buffer_threshold_seconds));

        // Engines share the one buffer; they never allocate their own.
        for engine in engines.iter_mut() {
            engine.set_audio_buffer(buffer.clone());
        }
        let engine_names: Vec<String> = engines.iter().map(|e| e.info().name).collect();

        let player = Arc::new(
            StreamPlayer::new(buffer.clone(), audio.clone(), sink_factory)
                .with_wav_tap(config.output_wav_file.clone())
                .with_metrics(metrics.clone()),
        );

        let callbacks: Arc<RwLock<Callbacks>> = Arc::new(RwLock::new(Callbacks::default()));
        Self::wire_player_callbacks(&player, &callbacks, &buffer, &audio, &config, &metrics);

        let segmenter = SentenceSegmenter::new(SegmenterConfig {
            minimum_sentence_length: config.minimum_sentence_length,
            buffer_threshold_seconds: config.buffer_threshold_seconds,
            fast_sentence_fragment: config.fast_sentence_fragment,
        });

        Ok(Arc::new(Self {
            audio,
            buffer,
            player,
            segmenter: Mutex::new(segmenter),
            last_feed: RwLock::new(Instant::now()),
            callbacks,
            engines: AsyncMutex::new(engines),
            engine_names: RwLock::new(engine_names),
            current_engine: AtomicUsize::new(0),
            state: StateManager::new(),
            cancel: Mutex::new(None),
            synthesis_task: Mutex::new(None),
            text_stream_active: AtomicBool::new(false),
            metrics,
            closed: AtomicBool::new(false),
            config,
        }))
    }

    fn wire_player_callbacks(
        player: &StreamPlayer,
        callbacks: &Arc<RwLock<Callbacks>>,
        buffer: &Arc<AudioBuffer>,
        audio: &AudioConfiguration,
        config: &StreamConfig,
        metrics: &Arc<PipelineMetrics>,
    ) {
        let bytes_per_second = audio.bytes_per_second() as f64;
        let fill_cap = config.buffer_threshold_seconds * 4.0;
        let bytes_forwarded = Arc::new(AtomicU64::new(0));
        let fill_state = Arc::new(AtomicU8::new(FILL_UNKNOWN));

        let chunk_cb = {
            let callbacks = callbacks.clone();
            let buffer = buffer.clone();
            let metrics = metrics.clone();
            Arc::new(move |bytes: &[u8]| {
                let total = bytes_forwarded.fetch_add(bytes.len() as u64, Ordering::SeqCst)
                    + bytes.len() as u64;
                let elapsed = Duration::from_secs_f64(total as f64 / bytes_per_second);
                let buffered = buffer.buffered_seconds();
                metrics.update_buffered_seconds(buffered);

                let guard = callbacks.read();
                guard.audio_chunk(bytes);
                guard.playback_progress(elapsed, elapsed + Duration::from_secs_f64(buffered));

                let new_fill = if buffered <= f64::EPSILON {
                    FILL_EMPTY
                } else if buffered >= fill_cap {
                    FILL_FULL
                } else {
                    FILL_MID
                };
                if fill_state.swap(new_fill, Ordering::SeqCst) != new_fill {
                    match new_fill {
                        FILL_EMPTY => guard.buffer_empty(),
                        FILL_FULL => guard.buffer_full(),
                        _ => {}
                    }
                }
            })
        };

        let word_cb = {
            let callbacks = callbacks.clone();
            Arc::new(move |timing: &streamvox_audio::TimingInfo| {
                callbacks.read().word(&timing.word);
            })
        };

        macro_rules! forward {
            ($method:ident) => {{
                let callbacks = callbacks.clone();
                Arc::new(move || callbacks.read().$method())
            }};
        }

        player.set_callbacks(PlayerCallbacks {
            on_audio_chunk: Some(chunk_cb),
            on_word: Some(word_cb),
            on_playback_start: Some(forward!(playback_start)),
            on_playback_stop: Some(forward!(playback_stop)),
            on_playback_pause: Some(forward!(playback_pause)),
            on_playback_resume: Some(forward!(playback_resume)),
        });
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self.callbacks.write() = callbacks;
    }

    /// Feed text into the pipeline. Accepted at any time, including during
    /// active playback; units are synthesized in feed order.
    pub fn feed(&self, text: &str) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::Fatal("pipeline is closed".to_string()));
        }
        if !text.is_empty() && !self.text_stream_active.swap(true, Ordering::SeqCst) {
            self.callbacks.read().text_stream_start();
        }

        {
            let guard = self.callbacks.read();
            for c in text.chars() {
                if self.config.log_characters {
                    debug!("feed char: {:?}", c);
                }
                guard.character(c);
            }
        }

        self.segmenter.lock().feed(text);
        *self.last_feed.write() = Instant::now();
        Ok(())
    }

    /// Fire-and-forget `feed`; errors surface via `on_error`.
    pub fn feed_async(self: &Arc<Self>, text: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.feed(&text) {
                this.callbacks.read().error(&e);
            }
        });
    }

    /// Drain a lazily produced sequence of text pieces into the pipeline.
    pub fn feed_generator<I>(self: &Arc<Self>, texts: I)
    where
        I: IntoIterator<Item = String> + Send + 'static,
        I::IntoIter: Send,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            for text in texts {
                if this.feed(&text).is_err() {
                    break;
                }
            }
        });
    }

    /// Start the player and the synthesis loop. Idempotence: a second call
    /// while a session is live returns `AlreadyPlaying`.
    pub fn play(self: &Arc<Self>) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::Fatal("pipeline is closed".to_string()));
        }
        match self.state.current() {
            PipelineState::Playing | PipelineState::Paused => {
                return Err(PipelineError::AlreadyPlaying);
            }
            _ => {}
        }
        self.state
            .transition(PipelineState::Playing)
            .map_err(|_| PipelineError::AlreadyPlaying)?;

        let cancel = CancelToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        self.callbacks.read().audio_stream_start();
        if let Err(e) = self.player.start() {
            let _ = self.state.transition(PipelineState::Stopping);
            let _ = self.state.transition(PipelineState::Stopped);
            let err = PipelineError::Player(e);
            self.callbacks.read().error(&err);
            return Err(err);
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.run_synthesis(cancel).await;
        });
        *self.synthesis_task.lock() = Some(handle);
        info!("Playback session started");
        Ok(())
    }

    /// Fire-and-forget `play`; errors surface via `on_error`.
    pub fn play_async(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.play() {
                // Player-start failures already fired on_error inside play().
                if !matches!(e, PipelineError::Player(_)) {
                    this.callbacks.read().error(&e);
                }
            }
        });
    }

    pub fn pause(&self) -> Result<(), PipelineError> {
        match self.state.current() {
            PipelineState::Playing => {}
            PipelineState::Paused => return Err(PipelineError::AlreadyPaused),
            _ => return Err(PipelineError::NotPlaying),
        }
        self.player.pause()?;
        self.state.transition(PipelineState::Paused)?;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), PipelineError> {
        match self.state.current() {
            PipelineState::Paused => {}
            PipelineState::Playing => return Err(PipelineError::NotPaused),
            _ => return Err(PipelineError::NotPlaying),
        }
        self.player.resume()?;
        self.state.transition(PipelineState::Playing)?;
        Ok(())
    }

    /// Cancel the session: stop engines and the player, discard everything
    /// buffered. `on_playback_stop` and `on_text_stream_stop` fire exactly
    /// once. A no-op when nothing is playing.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        match self.state.current() {
            PipelineState::Playing | PipelineState::Paused => {}
            _ => return Ok(()),
        }
        self.state.transition(PipelineState::Stopping)?;
        info!("Stopping playback session");

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        // Unblock any producer stuck on backpressure so it can observe the
        // cancellation.
        self.buffer.clear();

        let task = self.synthesis_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Synthesis task ended abnormally: {}", e);
            }
        }

        {
            let mut engines = self.engines.lock().await;
            for engine in engines.iter_mut() {
                if let Err(e) = engine.stop().await {
                    warn!("Engine stop failed: {}", e);
                }
            }
        }

        match self.player.stop() {
            Ok(()) | Err(PlayerError::NotPlaying) => {}
            Err(e) => {
                let err = PipelineError::Player(e);
                self.callbacks.read().error(&err);
            }
        }
        self.buffer.clear();
        let _ = self.segmenter.lock().flush();

        self.callbacks.read().audio_stream_stop();
        if self.text_stream_active.swap(false, Ordering::SeqCst) {
            self.callbacks.read().text_stream_stop();
        }
        self.state.transition(PipelineState::Stopped)?;
        info!("Playback session stopped");
        Ok(())
    }

    /// Block until the device has drained (see `StreamPlayer` for the
    /// heuristic) or `timeout` expires. Call from outside the async runtime
    /// or via `spawn_blocking`.
    pub fn wait_for_playback_complete(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.player
            .wait_for_playback_complete(timeout)
            .map_err(|e| match e {
                PlayerError::DrainTimeout { timeout } => PipelineError::PlaybackTimeout { timeout },
                other => PipelineError::Player(other),
            })
    }

    pub fn wait_for_playback_complete_default(&self) -> Result<(), PipelineError> {
        self.wait_for_playback_complete(DEFAULT_WAIT_TIMEOUT)
    }

    /// Terminal cleanup: stop, shut engines down, close the buffer.
    /// Idempotent. Truncates; callers wanting drain call
    /// `wait_for_playback_complete` first.
    pub async fn close(&self) -> Result<(), PipelineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop().await?;
        let mut engines = self.engines.lock().await;
        for engine in engines.iter_mut() {
            if let Err(e) = engine.shutdown().await {
                warn!("Engine shutdown failed: {}", e);
            }
        }
        self.buffer.close();
        info!("Pipeline closed");
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        matches!(
            self.state.current(),
            PipelineState::Playing | PipelineState::Paused
        )
    }

    pub fn is_paused(&self) -> bool {
        self.state.current() == PipelineState::Paused
    }

    pub fn status(&self) -> PipelineStatus {
        let names = self.engine_names.read();
        let count = names.len();
        let current = if count == 0 {
            String::new()
        } else {
            names[self.current_engine.load(Ordering::SeqCst) % count].clone()
        };
        PipelineStatus {
            is_playing: self.is_playing(),
            is_paused: self.is_paused(),
            current_engine: current,
            engine_count: count,
            player: self.player.stats(),
        }
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn playback_stats(&self) -> PlaybackStats {
        self.player.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.engine_names.read().clone()
    }

    pub async fn add_engine(&self, mut engine: Box<dyn TtsEngine>) {
        engine.set_audio_buffer(self.buffer.clone());
        let name = engine.info().name;
        self.engines.lock().await.push(engine);
        self.engine_names.write().push(name);
    }

    /// Remove an engine by name. The last engine cannot be removed.
    pub async fn remove_engine(&self, name: &str) -> Result<(), PipelineError> {
        let mut engines = self.engines.lock().await;
        if engines.len() <= 1 {
            return Err(PipelineError::NoEngines);
        }
        let index = engines
            .iter()
            .position(|e| e.info().name == name)
            .ok_or_else(|| PipelineError::Config(format!("no engine named {name:?}")))?;
        let mut removed = engines.remove(index);
        self.engine_names.write().remove(index);
        // Keep the round-robin pointer in range.
        self.current_engine.store(0, Ordering::SeqCst);
        drop(engines);
        let _ = removed.shutdown().await;
        Ok(())
    }

    // ── Synthesis loop ──────────────────────────────────────────────────

    async fn run_synthesis(self: Arc<Self>, cancel: CancelToken) {
        info!("Synthesis loop started");

        // A new session re-initializes every engine: a previous stop leaves
        // engines refusing to synthesize until initialize runs again.
        {
            let mut engines = self.engines.lock().await;
            for engine in engines.iter_mut() {
                if engine.status() == EngineStatus::Closed {
                    continue;
                }
                let name = engine.info().name;
                match engine.initialize(&self.audio).await {
                    Ok(()) => self.callbacks.read().engine_ready(&name),
                    Err(e) => {
                        warn!("Engine {} failed to initialize: {}", name, e);
                        self.metrics.incr_engine_errors();
                        self.callbacks.read().engine_error(&name, &e);
                    }
                }
            }
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let buffered = self.buffer.buffered_seconds();
            self.metrics.update_buffered_seconds(buffered);
            let unit = self.segmenter.lock().next_unit(buffered);
            let unit = match unit {
                Some(unit) => unit,
                None => {
                    // Flush unterminated trailing text once the feeder has
                    // gone quiet.
                    let idle = self.last_feed.read().elapsed();
                    let flushed = if idle >= FLUSH_IDLE {
                        self.segmenter.lock().flush()
                    } else {
                        None
                    };
                    match flushed {
                        Some(unit) => unit,
                        None => {
                            tokio::time::sleep(IDLE_POLL).await;
                            continue;
                        }
                    }
                }
            };

            self.metrics.incr_units_segmented();
            self.metrics.mark_stage_active(PipelineStage::Segmenter);
            self.callbacks.read().sentence(&unit);

            match self.synthesize_unit(&unit, &cancel).await {
                UnitOutcome::Synthesized(duration) => {
                    self.callbacks.read().sentence_synthesized(&unit, duration);
                    self.metrics.incr_sentences_synthesized();
                    if self.insert_trailing_silence(&unit).is_err() {
                        break;
                    }
                }
                UnitOutcome::Cancelled => break,
                UnitOutcome::Dropped => {
                    let err = PipelineError::SentenceDropped { unit };
                    warn!("{}", err);
                    self.callbacks.read().error(&err);
                    self.metrics.incr_sentences_dropped();
                }
            }
        }
        info!("Synthesis loop stopped");
    }

    async fn synthesize_unit(&self, unit: &str, cancel: &CancelToken) -> UnitOutcome {
        let engine_count = self.engines.lock().await.len();
        if engine_count == 0 {
            return UnitOutcome::Dropped;
        }
        // A single engine gets one fixed-backoff retry; multiple engines get
        // one full rotation.
        let max_tries = if engine_count == 1 { 2 } else { engine_count };

        let mut tries = 0;
        while tries < max_tries {
            if cancel.is_cancelled() {
                return UnitOutcome::Cancelled;
            }

            let mut engines = self.engines.lock().await;
            if engines.is_empty() {
                return UnitOutcome::Dropped;
            }
            let index = self.current_engine.load(Ordering::SeqCst) % engines.len();
            let engine = &mut engines[index];
            let name = engine.info().name;

            if engine.status() == EngineStatus::Uninitialized
                || engine.status() == EngineStatus::Closed
            {
                match engine.initialize(&self.audio).await {
                    Ok(()) => self.callbacks.read().engine_ready(&name),
                    Err(e) => {
                        drop(engines);
                        self.handle_engine_failure(&name, &e, engine_count).await;
                        tries += 1;
                        continue;
                    }
                }
            }

            self.callbacks.read().engine_synthesis_start(&name);
            self.metrics.mark_stage_active(PipelineStage::Synthesis);
            let start = Instant::now();
            let result = engine.synthesize(unit, cancel).await;
            self.callbacks.read().engine_synthesis_stop(&name);
            drop(engines);

            match result {
                Ok(()) => {
                    let wall = start.elapsed();
                    if wall.as_secs_f64() > self.config.buffer_threshold_seconds {
                        self.callbacks.read().latency_warning(wall);
                    }
                    return UnitOutcome::Synthesized(wall);
                }
                Err(e) if e.is_cancellation() => return UnitOutcome::Cancelled,
                Err(e) if !e.should_failover() => {
                    // The unit itself is at fault (bad input, bad parameter);
                    // another engine would reject it just the same.
                    warn!("Engine {} rejected unit: {}", name, e);
                    self.metrics.incr_engine_errors();
                    self.callbacks.read().engine_error(&name, &e);
                    return UnitOutcome::Dropped;
                }
                Err(e) => {
                    self.handle_engine_failure(&name, &e, engine_count).await;
                    tries += 1;
                }
            }
        }
        UnitOutcome::Dropped
    }

    async fn handle_engine_failure(
        &self,
        name: &str,
        error: &streamvox_tts::EngineError,
        engine_count: usize,
    ) {
        warn!("Engine {} failed: {}", name, error);
        self.metrics.incr_engine_errors();
        self.callbacks.read().engine_error(name, error);

        if engine_count <= 1 {
            tokio::time::sleep(SINGLE_ENGINE_BACKOFF).await;
            return;
        }

        let next = (self.current_engine.load(Ordering::SeqCst) + 1) % engine_count;
        self.current_engine.store(next, Ordering::SeqCst);
        let to = self
            .engine_names
            .read()
            .get(next)
            .cloned()
            .unwrap_or_default();
        info!("Failing over from engine {} to {}", name, to);
        // Timings from the failed engine describe audio that will never
        // play; drop them before the next engine starts numbering.
        self.buffer.clear_timings();
        self.metrics.incr_engine_failovers();
        self.callbacks.read().engine_switch(name, &to);
    }

    /// Enqueue zero-valued PCM after a synthesized unit: sentence silence
    /// for a terminal `.`/`!`/`?` plus comma silence per comma in the unit.
    /// Accounted like any other chunk so pacing and drain detection work
    /// uniformly.
    fn insert_trailing_silence(&self, unit: &str) -> Result<(), PipelineError> {
        let commas = unit.matches(',').count() as u32;
        let mut silence = self.config.comma_silence * commas;
        if unit.ends_with(['.', '!', '?']) {
            silence += self.config.sentence_silence;
        }
        if silence.is_zero() {
            return Ok(());
        }

        let bytes = self.audio.silence_bytes(silence);
        if bytes == 0 {
            return Ok(());
        }
        self.buffer
            .put_pcm(vec![0u8; bytes])
            .map_err(|_| PipelineError::ShutdownRequested)
    }
}
