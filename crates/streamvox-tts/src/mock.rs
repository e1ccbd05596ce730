//! Configurable in-memory engine for exercising the pipeline in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamvox_audio::{AudioBuffer, AudioConfiguration};
use streamvox_foundation::CancelToken;
use tracing::debug;

use crate::engine::{approximate_timings, EngineCore, TtsEngine};
use crate::error::{EngineError, EngineResult};
use crate::types::{EngineCapabilities, EngineInfo, EngineStatus, Voice, VoiceGender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Transient,
    Unavailable,
    /// Rejects the text itself, as if it failed engine-side validation.
    RejectsInput,
}

#[derive(Debug, Clone)]
pub struct MockEngineConfig {
    pub name: String,
    /// Synthesized audio length: `base_audio_ms + audio_ms_per_word * words`.
    pub base_audio_ms: u64,
    pub audio_ms_per_word: u64,
    pub emit_timings: bool,
    /// Fail every call once this many calls have succeeded. `Some(0)` fails
    /// from the first call.
    pub fail_after_calls: Option<usize>,
    pub failure: MockFailure,
    /// Simulated network/processing latency per call.
    pub synthesis_delay: Duration,
}

impl Default for MockEngineConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            base_audio_ms: 50,
            audio_ms_per_word: 150,
            emit_timings: true,
            fail_after_calls: None,
            failure: MockFailure::Transient,
            synthesis_delay: Duration::ZERO,
        }
    }
}

pub struct MockEngine {
    core: EngineCore,
    config: MockEngineConfig,
    audio_config: Option<AudioConfiguration>,
    current_voice: String,
    calls_made: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new(config: MockEngineConfig) -> Self {
        let core = EngineCore::new(config.name.clone());
        Self {
            core,
            config,
            audio_config: None,
            current_voice: "mock-default".to_string(),
            calls_made: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An engine that always succeeds.
    pub fn reliable(name: &str) -> Self {
        Self::new(MockEngineConfig {
            name: name.to_string(),
            ..MockEngineConfig::default()
        })
    }

    /// An engine that fails every call with the given class.
    pub fn failing(name: &str, failure: MockFailure) -> Self {
        Self::new(MockEngineConfig {
            name: name.to_string(),
            fail_after_calls: Some(0),
            failure,
            ..MockEngineConfig::default()
        })
    }

    /// Shared call counter, usable after the engine is boxed away.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls_made.clone()
    }

    fn fail_now(&self, calls_before: usize) -> Option<EngineError> {
        let threshold = self.config.fail_after_calls?;
        if calls_before >= threshold {
            Some(match self.config.failure {
                MockFailure::Transient => {
                    EngineError::Transient(format!("{} simulated failure", self.config.name))
                }
                MockFailure::Unavailable => {
                    EngineError::Unavailable(format!("{} simulated outage", self.config.name))
                }
                MockFailure::RejectsInput => {
                    EngineError::InvalidInput(format!("{} rejected the text", self.config.name))
                }
            })
        } else {
            None
        }
    }

    /// Deterministic non-silent PCM: a low-amplitude ramp.
    fn generate_pcm(&self, config: &AudioConfiguration, duration: Duration) -> Vec<u8> {
        let frames = (duration.as_secs_f64() * config.sample_rate as f64) as usize;
        let mut pcm = Vec::with_capacity(frames * config.bytes_per_frame());
        match config.bits_per_sample {
            16 => {
                for i in 0..frames {
                    let sample = ((i % 256) as i16 - 128) * 16;
                    for _ in 0..config.channels {
                        pcm.extend_from_slice(&sample.to_le_bytes());
                    }
                }
            }
            8 => {
                for i in 0..frames {
                    for _ in 0..config.channels {
                        pcm.push((i % 256) as u8);
                    }
                }
            }
            bits => {
                let bytes = bits as usize / 8;
                pcm.resize(frames * config.channels as usize * bytes, 0);
            }
        }
        pcm
    }
}

#[async_trait]
impl TtsEngine for MockEngine {
    fn info(&self) -> EngineInfo {
        EngineInfo {
            name: self.config.name.clone(),
            version: "1.0.0".to_string(),
            capabilities: EngineCapabilities {
                streaming: true,
                word_timings: self.config.emit_timings,
                languages: vec!["en".to_string()],
            },
        }
    }

    fn status(&self) -> EngineStatus {
        self.core.status()
    }

    async fn initialize(&mut self, config: &AudioConfiguration) -> EngineResult<()> {
        config
            .validate()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        self.core.set_status(EngineStatus::Initializing);
        self.audio_config = Some(config.clone());
        self.core.clear_stop();
        self.core.set_status(EngineStatus::Ready);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn voices(&self) -> EngineResult<Vec<Voice>> {
        Ok(vec![
            Voice {
                id: "mock-default".to_string(),
                name: "Mock Default".to_string(),
                language: "en-US".to_string(),
                gender: Some(VoiceGender::Neutral),
                description: None,
            },
            Voice {
                id: "mock-alt".to_string(),
                name: "Mock Alternative".to_string(),
                language: "en-GB".to_string(),
                gender: Some(VoiceGender::Female),
                description: None,
            },
        ])
    }

    async fn set_voice(&mut self, voice_id: &str) -> EngineResult<()> {
        let known = self.voices().await?.iter().any(|v| v.id == voice_id);
        if !known {
            return Err(EngineError::VoiceNotFound(voice_id.to_string()));
        }
        self.current_voice = voice_id.to_string();
        Ok(())
    }

    async fn set_parameters(&mut self, params: HashMap<String, String>) -> EngineResult<()> {
        for (name, value) in &params {
            match name.as_str() {
                "delay_ms" => {
                    let ms: u64 = value.parse().map_err(|_| EngineError::InvalidParameter {
                        name: name.clone(),
                        reason: format!("not an integer: {value}"),
                    })?;
                    self.config.synthesis_delay = Duration::from_millis(ms);
                }
                other => {
                    return Err(EngineError::InvalidParameter {
                        name: other.to_string(),
                        reason: "unknown parameter".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn set_audio_buffer(&mut self, buffer: Arc<AudioBuffer>) {
        self.core.attach_buffer(buffer);
    }

    async fn synthesize(&mut self, text: &str, cancel: &CancelToken) -> EngineResult<()> {
        let config = self
            .audio_config
            .clone()
            .ok_or(EngineError::NotInitialized)?;
        self.core.check_live(cancel)?;
        if text.trim().is_empty() {
            return Err(EngineError::InvalidInput("empty text".to_string()));
        }

        let calls_before = self.calls_made.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_now(calls_before) {
            self.core.set_status(EngineStatus::Error);
            return Err(err);
        }

        self.core.set_status(EngineStatus::Synthesizing);
        if !self.config.synthesis_delay.is_zero() {
            tokio::time::sleep(self.config.synthesis_delay).await;
        }

        let words = text.split_whitespace().count().max(1);
        let duration = Duration::from_millis(
            self.config.base_audio_ms + self.config.audio_ms_per_word * words as u64,
        );
        let pcm = self.generate_pcm(&config, duration);
        debug!(
            "Mock engine {} synthesizing {} bytes for {:?}",
            self.config.name,
            pcm.len(),
            text
        );

        if self.config.emit_timings {
            for timing in approximate_timings(text, duration) {
                self.core.enqueue_timing(timing);
            }
        }

        let result = self.core.enqueue_chunked(&pcm, &config, cancel);
        match &result {
            Ok(()) => {
                self.core.set_status(EngineStatus::Ready);
            }
            Err(e) if e.is_cancellation() => {
                self.core.set_status(EngineStatus::Ready);
            }
            Err(_) => {
                self.core.set_status(EngineStatus::Error);
            }
        }
        result
    }

    async fn stop(&mut self) -> EngineResult<()> {
        self.core.request_stop();
        Ok(())
    }

    async fn shutdown(&mut self) -> EngineResult<()> {
        self.core.request_stop();
        self.core.set_status(EngineStatus::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_for(config: &AudioConfiguration) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(config, 60.0))
    }

    #[tokio::test]
    async fn synthesize_enqueues_expected_audio_length() {
        let config = AudioConfiguration::default();
        let buffer = buffer_for(&config);
        let mut engine = MockEngine::reliable("m0");
        engine.initialize(&config).await.unwrap();
        engine.set_audio_buffer(buffer.clone());

        engine
            .synthesize("hello world", &CancelToken::new())
            .await
            .unwrap();

        // 50 ms base + 2 words * 150 ms = 350 ms of audio
        let expected_frames = (0.35 * config.sample_rate as f64) as u64;
        assert_eq!(buffer.total_samples(), expected_frames);
        assert!(buffer.stats().timing_queue_len == 2);
    }

    #[tokio::test]
    async fn synthesize_requires_initialization() {
        let mut engine = MockEngine::reliable("m0");
        let err = engine
            .synthesize("hi", &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotInitialized));
    }

    #[tokio::test]
    async fn failure_injection_after_threshold() {
        let config = AudioConfiguration::default();
        let mut engine = MockEngine::new(MockEngineConfig {
            fail_after_calls: Some(1),
            ..MockEngineConfig::default()
        });
        engine.initialize(&config).await.unwrap();
        engine.set_audio_buffer(buffer_for(&config));

        let cancel = CancelToken::new();
        engine.synthesize("first call works", &cancel).await.unwrap();
        let err = engine.synthesize("second fails", &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Transient(_)));
        assert_eq!(engine.status(), EngineStatus::Error);
    }

    #[tokio::test]
    async fn stop_latches_until_reinitialize() {
        let config = AudioConfiguration::default();
        let mut engine = MockEngine::reliable("m0");
        engine.initialize(&config).await.unwrap();
        engine.set_audio_buffer(buffer_for(&config));

        engine.stop().await.unwrap();
        let err = engine
            .synthesize("nope", &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Stopped));

        engine.initialize(&config).await.unwrap();
        assert!(engine
            .synthesize("works again", &CancelToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let config = AudioConfiguration::default();
        let mut engine = MockEngine::reliable("m0");
        engine.initialize(&config).await.unwrap();
        engine.set_audio_buffer(buffer_for(&config));

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = engine.synthesize("text", &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn unknown_voice_is_rejected_without_side_effect() {
        let mut engine = MockEngine::reliable("m0");
        let before = engine.current_voice.clone();
        let err = engine.set_voice("nonexistent").await.unwrap_err();
        assert!(matches!(err, EngineError::VoiceNotFound(_)));
        assert_eq!(engine.current_voice, before);
    }

    #[tokio::test]
    async fn invalid_parameter_rejected() {
        let mut engine = MockEngine::reliable("m0");
        let mut params = HashMap::new();
        params.insert("delay_ms".to_string(), "not-a-number".to_string());
        assert!(matches!(
            engine.set_parameters(params).await,
            Err(EngineError::InvalidParameter { .. })
        ));

        let mut good = HashMap::new();
        good.insert("delay_ms".to_string(), "5".to_string());
        engine.set_parameters(good).await.unwrap();
        assert_eq!(engine.config.synthesis_delay, Duration::from_millis(5));
    }
}
