//! PCM sample-width conversion to the device's native f32 format.

/// Convert little-endian PCM bytes into f32 samples in [-1.0, 1.0).
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn pcm_to_f32(data: &[u8], bits_per_sample: u16, out: &mut Vec<f32>) {
    out.clear();
    match bits_per_sample {
        8 => {
            out.reserve(data.len());
            for &b in data {
                out.push((b as i16 - 128) as f32 / 128.0);
            }
        }
        16 => {
            out.reserve(data.len() / 2);
            for pair in data.chunks_exact(2) {
                let v = i16::from_le_bytes([pair[0], pair[1]]);
                out.push(i16_to_f32(v));
            }
        }
        24 => {
            out.reserve(data.len() / 3);
            for triple in data.chunks_exact(3) {
                // Sign-extend 24 -> 32 via a left shift into the high bytes.
                let v = i32::from_le_bytes([0, triple[0], triple[1], triple[2]]) >> 8;
                out.push(v as f32 / 8_388_608.0);
            }
        }
        32 => {
            out.reserve(data.len() / 4);
            for quad in data.chunks_exact(4) {
                let v = i32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
                out.push(v as f32 / 2_147_483_648.0);
            }
        }
        other => {
            tracing::warn!("Unsupported bit depth {}, treating as 16-bit", other);
            for pair in data.chunks_exact(2) {
                let v = i16::from_le_bytes([pair[0], pair[1]]);
                out.push(i16_to_f32(v));
            }
        }
    }
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * 32_768.0).round_ties_even().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_round_trip_is_identity() {
        for v in [i16::MIN, -12345, -1, 0, 1, 127, 12345, i16::MAX] {
            assert_eq!(f32_to_i16(i16_to_f32(v)), v, "round trip failed for {v}");
        }
    }

    #[test]
    fn i16_round_trip_exhaustive() {
        for v in i16::MIN..=i16::MAX {
            assert_eq!(f32_to_i16(i16_to_f32(v)), v);
        }
    }

    #[test]
    fn pcm16_known_values() {
        let data = [
            0x00, 0x80, // i16::MIN
            0x00, 0x00, // 0
            0xFF, 0x7F, // i16::MAX
        ];
        let mut out = Vec::new();
        pcm_to_f32(&data, 16, &mut out);
        assert_eq!(out.len(), 3);
        assert!((out[0] + 1.0).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 32767.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn pcm8_is_centered_on_128() {
        let data = [0u8, 128, 255];
        let mut out = Vec::new();
        pcm_to_f32(&data, 8, &mut out);
        assert!((out[0] + 1.0).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn pcm24_sign_extension() {
        // 0x800000 is the most negative 24-bit value.
        let data = [0x00, 0x00, 0x80, 0xFF, 0xFF, 0x7F];
        let mut out = Vec::new();
        pcm_to_f32(&data, 24, &mut out);
        assert!((out[0] + 1.0).abs() < 1e-6);
        assert!((out[1] - 8_388_607.0 / 8_388_608.0).abs() < 1e-6);
    }

    #[test]
    fn pcm32_full_scale() {
        let data = [0x00, 0x00, 0x00, 0x80, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut out = Vec::new();
        pcm_to_f32(&data, 32, &mut out);
        assert!((out[0] + 1.0).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn partial_trailing_sample_ignored() {
        let data = [0x00, 0x00, 0xFF];
        let mut out = Vec::new();
        pcm_to_f32(&data, 16, &mut out);
        assert_eq!(out.len(), 1);
    }
}
