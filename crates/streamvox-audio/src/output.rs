//! Output device adaptor.
//!
//! `DeviceManager` wraps the cpal host for enumeration and device selection.
//! `AudioOutput` owns a cpal output stream whose pull callback drains a
//! real-time-safe ring; the playback worker feeds the ring through the
//! `AudioSink` trait. The trait is the hardware seam: tests substitute
//! `MemorySink` and run the whole player without a sound card.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, Stream, StreamConfig};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamvox_foundation::{AudioError, CancelToken};

use crate::config::AudioConfiguration;

/// Rates tried when the device rejects the configured one, per the
/// closest-wins fallback policy.
pub const CANDIDATE_RATES: [u32; 6] = [8_000, 11_025, 16_000, 22_050, 44_100, 48_000];

/// Destination for converted f32 frames. Implementations block in `write`
/// until the frames are accepted or the session is cancelled.
pub trait AudioSink {
    /// The rate the sink actually runs at (after negotiation).
    fn sample_rate(&self) -> u32;

    /// Write interleaved f32 frames. Blocks while the device queue is full;
    /// returns early (Ok) once the session cancel token fires.
    fn write(&mut self, frames: &[f32]) -> Result<(), AudioError>;

    /// Stop and release the device. Idempotent.
    fn close(&mut self) -> Result<(), AudioError>;
}

/// Creates a sink at session start. Invoked on the playback worker thread
/// because cpal streams must live on the thread that services them.
pub type SinkFactory =
    Arc<dyn Fn(&AudioConfiguration, CancelToken) -> Result<Box<dyn AudioSink>, AudioError> + Send + Sync>;

/// Factory producing the cpal-backed sink.
pub fn cpal_sink_factory() -> SinkFactory {
    Arc::new(|config, cancel| Ok(Box::new(AudioOutput::open(config, cancel)?) as Box<dyn AudioSink>))
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub max_channels: u16,
    pub is_default: bool,
}

pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    pub fn host_id(&self) -> cpal::HostId {
        self.host.id()
    }

    pub fn default_output_name(&self) -> Option<String> {
        self.host.default_output_device().and_then(|d| d.name().ok())
    }

    pub fn enumerate_outputs(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        let default_name = self.default_output_name();
        let mut devices = Vec::new();
        for device in self.host.output_devices()? {
            let Ok(name) = device.name() else { continue };
            let max_channels = device
                .supported_output_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);
            if max_channels == 0 {
                continue;
            }
            devices.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_channels,
            });
        }
        Ok(devices)
    }

    /// Open the output device at `index`, or the host default when `None`.
    pub fn open_output(&self, index: Option<usize>) -> Result<Device, AudioError> {
        match index {
            Some(index) => {
                let mut devices: Vec<Device> = self.host.output_devices()?.collect();
                let available = devices.len();
                if index >= available {
                    return Err(AudioError::DeviceIndexOutOfRange { index, available });
                }
                Ok(devices.swap_remove(index))
            }
            None => self
                .host
                .default_output_device()
                .ok_or(AudioError::DeviceNotFound { name: None }),
        }
    }
}

/// Pick the output rate: the configured rate when the device supports it at
/// the configured channel count, otherwise the closest supported candidate.
fn negotiate_sample_rate(device: &Device, config: &AudioConfiguration) -> Result<u32, AudioError> {
    let desired = config.sample_rate;
    let supported: Vec<_> = device
        .supported_output_configs()?
        .filter(|c| c.channels() == config.channels && c.sample_format() == SampleFormat::F32)
        .collect();

    if supported.is_empty() {
        return Err(AudioError::FormatNotSupported {
            format: format!("{} ch f32 output", config.channels),
        });
    }

    let rate_supported = |rate: u32| {
        supported
            .iter()
            .any(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
    };

    if rate_supported(desired) {
        return Ok(desired);
    }

    let fallback = CANDIDATE_RATES
        .iter()
        .copied()
        .filter(|&rate| rate_supported(rate))
        .min_by_key(|&rate| rate.abs_diff(desired));

    match fallback {
        Some(rate) => {
            tracing::warn!(
                "Requested sample rate {} Hz unsupported, falling back to {} Hz",
                desired,
                rate
            );
            Ok(rate)
        }
        None => {
            // Nothing from the candidate set fits; take the device's default.
            let default = device
                .default_output_config()
                .map_err(|e| AudioError::FormatNotSupported {
                    format: format!("no default output config: {e}"),
                })?;
            Ok(default.sample_rate().0)
        }
    }
}

/// Given a desired rate and the per-range support test, choose from the
/// candidate set by minimal distance. Split out for unit testing away from
/// hardware.
pub fn closest_candidate(desired: u32) -> u32 {
    CANDIDATE_RATES
        .iter()
        .copied()
        .min_by_key(|&rate| rate.abs_diff(desired))
        .expect("candidate set is non-empty")
}

/// cpal-backed `AudioSink`. The stream callback pulls from an rtrb ring and
/// pads with silence on underrun, so the device is never starved of a
/// buffer; `write` blocks while the ring is full, which paces the playback
/// worker to real time.
pub struct AudioOutput {
    _stream: Stream,
    producer: Producer<f32>,
    cancel: CancelToken,
    actual_sample_rate: u32,
    underruns: Arc<AtomicU64>,
    closed: bool,
}

impl AudioOutput {
    pub fn open(config: &AudioConfiguration, cancel: CancelToken) -> Result<Self, AudioError> {
        config.validate()?;
        let manager = DeviceManager::new()?;
        let device = manager.open_output(config.output_device_index)?;
        if let Ok(name) = device.name() {
            tracing::info!("Opening output device: {} (host: {:?})", name, manager.host_id());
        }

        let actual_sample_rate = negotiate_sample_rate(&device, config)?;
        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(actual_sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // One second of audio between worker and callback.
        let ring_capacity = actual_sample_rate as usize * config.channels as usize;
        let (producer, consumer) = RingBuffer::new(ring_capacity);

        let underruns = Arc::new(AtomicU64::new(0));
        let stream = Self::build_stream(&device, &stream_config, consumer, underruns.clone())?;
        stream.play()?;

        Ok(Self {
            _stream: stream,
            producer,
            cancel,
            actual_sample_rate,
            underruns,
            closed: false,
        })
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn build_stream(
        device: &Device,
        config: &StreamConfig,
        mut consumer: Consumer<f32>,
        underruns: Arc<AtomicU64>,
    ) -> Result<Stream, AudioError> {
        let err_fn = |err: cpal::StreamError| {
            tracing::error!("Output stream error: {}", err);
        };

        let stream = device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let read = read_into(&mut consumer, data);
                if read < data.len() {
                    // Underrun is normal while the producer is behind; the
                    // device gets silence instead of stale memory.
                    for sample in &mut data[read..] {
                        *sample = 0.0;
                    }
                    underruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }
}

/// Non-blocking read of up to `out.len()` samples from the ring.
fn read_into(consumer: &mut Consumer<f32>, out: &mut [f32]) -> usize {
    let chunk = match consumer.read_chunk(out.len()) {
        Ok(chunk) => chunk,
        Err(rtrb::chunks::ChunkError::TooFewSlots(available)) => {
            if available == 0 {
                return 0;
            }
            match consumer.read_chunk(available) {
                Ok(chunk) => chunk,
                Err(_) => return 0,
            }
        }
    };
    let len = chunk.len();
    let (first, second) = chunk.as_slices();
    out[..first.len()].copy_from_slice(first);
    if !second.is_empty() {
        out[first.len()..first.len() + second.len()].copy_from_slice(second);
    }
    chunk.commit_all();
    len
}

impl AudioSink for AudioOutput {
    fn sample_rate(&self) -> u32 {
        self.actual_sample_rate
    }

    fn write(&mut self, frames: &[f32]) -> Result<(), AudioError> {
        let mut offset = 0;
        while offset < frames.len() {
            if self.closed || self.cancel.is_cancelled() {
                return Ok(());
            }
            let free = self.producer.slots();
            if free == 0 {
                std::thread::sleep(Duration::from_millis(2));
                continue;
            }
            let n = free.min(frames.len() - offset);
            let mut chunk = self
                .producer
                .write_chunk(n)
                .map_err(|_| AudioError::DeviceDisconnected)?;
            let (first, second) = chunk.as_mut_slices();
            let split = first.len();
            first.copy_from_slice(&frames[offset..offset + split]);
            if !second.is_empty() {
                second.copy_from_slice(&frames[offset + split..offset + n]);
            }
            chunk.commit_all();
            offset += n;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if !self.closed {
            self.closed = true;
            tracing::debug!(
                "Closing output stream ({} underruns observed)",
                self.underruns()
            );
        }
        Ok(())
    }
}

/// In-memory sink for tests and headless runs. Accepts frames instantly and
/// counts them.
pub struct MemorySink {
    sample_rate: u32,
    frames_written: Arc<AtomicU64>,
    closed: bool,
}

impl MemorySink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_written: Arc::new(AtomicU64::new(0)),
            closed: false,
        }
    }

    pub fn counter(&self) -> Arc<AtomicU64> {
        self.frames_written.clone()
    }

    /// Factory plus the shared frame counter the sink will increment.
    pub fn factory(sample_rate: u32) -> (SinkFactory, Arc<AtomicU64>) {
        let counter = Arc::new(AtomicU64::new(0));
        let shared = counter.clone();
        let factory: SinkFactory = Arc::new(move |_config, _cancel| {
            Ok(Box::new(MemorySink {
                sample_rate,
                frames_written: shared.clone(),
                closed: false,
            }) as Box<dyn AudioSink>)
        });
        (factory, counter)
    }
}

impl AudioSink for MemorySink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&mut self, frames: &[f32]) -> Result<(), AudioError> {
        if self.closed {
            return Ok(());
        }
        self.frames_written
            .fetch_add(frames.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.closed = true;
        Ok(())
    }
}
