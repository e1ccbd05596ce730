use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No engines configured")]
    NoEngines,

    #[error("Already playing")]
    AlreadyPlaying,

    #[error("Not playing")]
    NotPlaying,

    #[error("Already paused")]
    AlreadyPaused,

    #[error("Not paused")]
    NotPaused,

    #[error("Sentence dropped after exhausting all engines: {unit:?}")]
    SentenceDropped { unit: String },

    #[error("Timed out waiting for playback to complete after {timeout:?}")]
    PlaybackTimeout { timeout: Duration },

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Output device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("Output device index {index} out of range ({available} devices)")]
    DeviceIndexOutOfRange { index: usize, available: usize },

    #[error("Device disconnected")]
    DeviceDisconnected,

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Invalid channel count: {channels} (must be 1..=8)")]
    InvalidChannels { channels: u16 },

    #[error("Invalid sample rate: {sample_rate}")]
    InvalidSampleRate { sample_rate: u32 },

    #[error("Invalid bits per sample: {bits} (must be 8, 16, 24 or 32)")]
    InvalidBitsPerSample { bits: u16 },

    #[error("Invalid volume: {volume} (must be within 0.0..=1.0)")]
    InvalidVolume { volume: f64 },

    #[error("Invalid playback speed: {speed} (must be > 0.0)")]
    InvalidPlaybackSpeed { speed: f64 },

    #[error("WAV tap error: {0}")]
    WavTap(String),

    #[error("CPAL error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Pause stream error: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Device enumeration error: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// Buffer operations distinguish normal flow control from terminal states.
/// `Timeout` on a read is an underrun and is expected while the producer is
/// still synthesizing; `Closed` ends the consumer loop.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffer is full")]
    Full,

    #[error("Buffer operation timed out")]
    Timeout,

    #[error("Buffer is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Player is already playing")]
    AlreadyPlaying,

    #[error("Player is not playing")]
    NotPlaying,

    #[error("Player is already paused")]
    AlreadyPaused,

    #[error("Player is not paused")]
    NotPaused,

    #[error("Playback worker did not exit within {timeout:?}")]
    WorkerStuck { timeout: Duration },

    #[error("Playback did not drain within {timeout:?}")]
    DrainTimeout { timeout: Duration },

    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    Failover,
    Ignore,
    Fatal,
}

impl PipelineError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            PipelineError::Audio(AudioError::DeviceDisconnected) => RecoveryStrategy::Retry {
                max_attempts: 3,
                delay: Duration::from_secs(1),
            },
            PipelineError::SentenceDropped { .. } => RecoveryStrategy::Ignore,
            PipelineError::Fatal(_) | PipelineError::ShutdownRequested => RecoveryStrategy::Fatal,
            PipelineError::Audio(_) | PipelineError::Player(_) => RecoveryStrategy::Fatal,
            _ => RecoveryStrategy::Ignore,
        }
    }
}
