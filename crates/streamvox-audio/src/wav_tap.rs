//! Optional WAV mirror of everything the player consumes.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use streamvox_foundation::AudioError;

use crate::config::AudioConfiguration;

/// Mirrors played PCM into a WAV file. Chunks are written as they are
/// dequeued, so the file reflects playback order; the header is finalized
/// when the tap is dropped or `finalize` is called.
pub struct WavTap {
    writer: Option<WavWriter<BufWriter<File>>>,
    bits_per_sample: u16,
}

impl WavTap {
    pub fn create(path: &Path, config: &AudioConfiguration) -> Result<Self, AudioError> {
        let spec = WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: config.bits_per_sample,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .map_err(|e| AudioError::WavTap(format!("create {}: {e}", path.display())))?;
        Ok(Self {
            writer: Some(writer),
            bits_per_sample: config.bits_per_sample,
        })
    }

    pub fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let result = match self.bits_per_sample {
            8 => pcm
                .iter()
                .try_for_each(|&b| writer.write_sample((b as i16 - 128) as i8)),
            16 => pcm
                .chunks_exact(2)
                .try_for_each(|s| writer.write_sample(i16::from_le_bytes([s[0], s[1]]))),
            24 => pcm.chunks_exact(3).try_for_each(|s| {
                writer.write_sample(i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8)
            }),
            32 => pcm
                .chunks_exact(4)
                .try_for_each(|s| writer.write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))),
            other => {
                return Err(AudioError::WavTap(format!("unsupported bit depth {other}")));
            }
        };
        result.map_err(|e| AudioError::WavTap(format!("write: {e}")))
    }

    pub fn finalize(&mut self) -> Result<(), AudioError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| AudioError::WavTap(format!("finalize: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for WavTap {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::warn!("WAV tap finalize failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfiguration;

    #[test]
    fn tap_writes_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap.wav");
        let config = AudioConfiguration::default();

        let mut tap = WavTap::create(&path, &config).unwrap();
        let pcm: Vec<u8> = (0..64u16)
            .flat_map(|i| ((i as i16) * 100).to_le_bytes())
            .collect();
        tap.write(&pcm).unwrap();
        tap.finalize().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 64);
        assert_eq!(samples[1], 100);
    }

    #[test]
    fn tap_rejects_nothing_after_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap.wav");
        let mut tap = WavTap::create(&path, &AudioConfiguration::default()).unwrap();
        tap.finalize().unwrap();
        // Further writes are ignored rather than corrupting the file.
        assert!(tap.write(&[0, 0]).is_ok());
    }
}
