//! Pipeline-level configuration.

use std::path::PathBuf;
use std::time::Duration;
use streamvox_audio::AudioConfiguration;

/// Configuration for a `TextToAudioStream`.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub audio: AudioConfiguration,
    /// Fragments are emitted while the buffer holds less than this.
    pub buffer_threshold_seconds: f64,
    /// Minimum fragment length in code points.
    pub minimum_sentence_length: usize,
    /// Allow early fragments to keep the device primed.
    pub fast_sentence_fragment: bool,
    /// Silence appended per comma in a synthesized unit.
    pub comma_silence: Duration,
    /// Silence appended after a sentence terminator.
    pub sentence_silence: Duration,
    /// Mirror played PCM into this WAV file.
    pub output_wav_file: Option<PathBuf>,
    /// Log each fed character at debug level.
    pub log_characters: bool,
    pub output_device_index: Option<usize>,
    pub language: String,
    pub muted: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfiguration::default(),
            buffer_threshold_seconds: 2.0,
            minimum_sentence_length: 10,
            fast_sentence_fragment: true,
            comma_silence: Duration::from_millis(100),
            sentence_silence: Duration::from_millis(300),
            output_wav_file: None,
            log_characters: false,
            output_device_index: None,
            language: "en".to_string(),
            muted: false,
        }
    }
}

impl StreamConfig {
    /// Audio configuration with the stream-level overrides folded in.
    pub(crate) fn effective_audio(&self) -> AudioConfiguration {
        let mut audio = self.audio.clone();
        audio.muted = self.muted || audio.muted;
        audio.comma_silence = self.comma_silence;
        audio.sentence_silence = self.sentence_silence;
        if self.output_device_index.is_some() {
            audio.output_device_index = self.output_device_index;
        }
        audio
    }
}
