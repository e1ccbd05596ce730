//! Output stream configuration and derived byte math.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use streamvox_foundation::AudioError;

/// Container/encoding of audio handed to the player.
///
/// The player only accepts the PCM variants; compressed formats must be
/// decoded upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    PcmS16Le,
    PcmS24Le,
    PcmS32Le,
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn is_pcm(&self) -> bool {
        matches!(
            self,
            AudioFormat::PcmS16Le | AudioFormat::PcmS24Le | AudioFormat::PcmS32Le
        )
    }
}

/// Immutable description of the PCM stream the player is opened with.
///
/// `bytes_per_frame = channels * bits_per_sample / 8` and
/// `bytes_per_second = sample_rate * bytes_per_frame` hold by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfiguration {
    pub format: AudioFormat,
    /// 1..=8
    pub channels: u16,
    pub sample_rate: u32,
    /// 8, 16, 24 or 32
    pub bits_per_sample: u16,
    /// Frames requested per device buffer.
    pub frames_per_buffer: u32,
    /// Bytes pulled from the buffer per playout step. `None` resolves to
    /// `frames_per_buffer * bytes_per_frame` when the player starts.
    pub playout_chunk_size: Option<usize>,
    /// 0.0..=1.0, applied after sample conversion.
    pub volume: f64,
    /// Must be > 0.0.
    pub playback_speed: f64,
    pub muted: bool,
    pub comma_silence: Duration,
    pub sentence_silence: Duration,
    /// Index into the enumerated output devices; `None` uses the default.
    pub output_device_index: Option<usize>,
}

impl Default for AudioConfiguration {
    fn default() -> Self {
        Self {
            format: AudioFormat::PcmS16Le,
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            frames_per_buffer: 1024,
            playout_chunk_size: Some(4096),
            volume: 1.0,
            playback_speed: 1.0,
            muted: false,
            comma_silence: Duration::from_millis(100),
            sentence_silence: Duration::from_millis(300),
            output_device_index: None,
        }
    }
}

impl AudioConfiguration {
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.channels == 0 || self.channels > 8 {
            return Err(AudioError::InvalidChannels {
                channels: self.channels,
            });
        }
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate {
                sample_rate: self.sample_rate,
            });
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(AudioError::InvalidBitsPerSample {
                bits: self.bits_per_sample,
            });
        }
        if self.frames_per_buffer == 0 {
            return Err(AudioError::FormatNotSupported {
                format: "frames_per_buffer must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(AudioError::InvalidVolume {
                volume: self.volume,
            });
        }
        if self.playback_speed <= 0.0 {
            return Err(AudioError::InvalidPlaybackSpeed {
                speed: self.playback_speed,
            });
        }
        if !self.format.is_pcm() {
            return Err(AudioError::FormatNotSupported {
                format: format!("{:?} (player requires PCM)", self.format),
            });
        }
        Ok(())
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_frame()
    }

    /// Playout chunk size with the auto value resolved.
    pub fn resolved_playout_chunk_size(&self) -> usize {
        self.playout_chunk_size
            .unwrap_or(self.frames_per_buffer as usize * self.bytes_per_frame())
    }

    /// Byte count of `duration` of silence, rounded down to a whole frame.
    pub fn silence_bytes(&self, duration: Duration) -> usize {
        let raw = (duration.as_secs_f64() * self.bytes_per_second() as f64) as usize;
        raw - raw % self.bytes_per_frame()
    }
}

/// Word-level timing reported alongside PCM, used for captioning.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingInfo {
    pub word: String,
    pub start: Duration,
    pub end: Duration,
}

impl TimingInfo {
    pub fn new(word: impl Into<String>, start: Duration, end: Duration) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AudioConfiguration::default().validate().is_ok());
    }

    #[test]
    fn byte_math() {
        let config = AudioConfiguration::default();
        assert_eq!(config.bytes_per_frame(), 2);
        assert_eq!(config.bytes_per_second(), 32_000);

        let stereo = AudioConfiguration {
            channels: 2,
            bits_per_sample: 24,
            sample_rate: 48_000,
            ..AudioConfiguration::default()
        };
        assert_eq!(stereo.bytes_per_frame(), 6);
        assert_eq!(stereo.bytes_per_second(), 288_000);
    }

    #[test]
    fn validation_rejects_out_of_range_fields() {
        let mut config = AudioConfiguration {
            channels: 0,
            ..AudioConfiguration::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AudioError::InvalidChannels { .. })
        ));

        config.channels = 1;
        config.bits_per_sample = 12;
        assert!(matches!(
            config.validate(),
            Err(AudioError::InvalidBitsPerSample { .. })
        ));

        config.bits_per_sample = 16;
        config.volume = 1.5;
        assert!(matches!(
            config.validate(),
            Err(AudioError::InvalidVolume { .. })
        ));

        config.volume = 1.0;
        config.playback_speed = 0.0;
        assert!(matches!(
            config.validate(),
            Err(AudioError::InvalidPlaybackSpeed { .. })
        ));
    }

    #[test]
    fn validation_rejects_compressed_formats() {
        let config = AudioConfiguration {
            format: AudioFormat::Mp3,
            ..AudioConfiguration::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AudioError::FormatNotSupported { .. })
        ));
    }

    #[test]
    fn playout_chunk_auto_resolution() {
        let config = AudioConfiguration {
            playout_chunk_size: None,
            ..AudioConfiguration::default()
        };
        assert_eq!(config.resolved_playout_chunk_size(), 1024 * 2);

        let explicit = AudioConfiguration::default();
        assert_eq!(explicit.resolved_playout_chunk_size(), 4096);
    }

    #[test]
    fn silence_bytes_is_frame_aligned() {
        let config = AudioConfiguration {
            channels: 2,
            ..AudioConfiguration::default()
        };
        let bytes = config.silence_bytes(Duration::from_millis(100));
        assert_eq!(bytes % config.bytes_per_frame(), 0);
        // 0.1 s at 16 kHz stereo 16-bit = 6400 bytes
        assert_eq!(bytes, 6400);
    }

    #[test]
    fn timing_duration_never_negative() {
        let timing = TimingInfo::new(
            "word",
            Duration::from_millis(500),
            Duration::from_millis(200),
        );
        assert_eq!(timing.duration(), Duration::ZERO);
    }
}
