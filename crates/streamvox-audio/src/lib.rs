//! Audio side of the StreamVox pipeline: stream configuration, the shared
//! PCM buffer, the playback worker and the output-device adaptor.

pub mod buffer;
pub mod config;
pub mod convert;
pub mod output;
pub mod player;
pub mod wav_tap;

pub use buffer::{AudioBuffer, BufferStats};
pub use config::{AudioConfiguration, AudioFormat, TimingInfo};
pub use output::{
    cpal_sink_factory, AudioOutput, AudioSink, DeviceInfo, DeviceManager, MemorySink, SinkFactory,
    CANDIDATE_RATES,
};
pub use player::{PlaybackStats, PlayerCallbacks, StreamPlayer};
pub use wav_tap::WavTap;
