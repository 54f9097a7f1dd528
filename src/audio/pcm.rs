//! Raw linear PCM wire conversion and level metering.
//!
//! The wire format in both directions is mono i16 little-endian; no
//! compression is applied.

use bytes::Bytes;

use crate::error::SessionError;

/// Convert float samples in [-1, 1] to the i16le wire payload.
/// Out-of-range samples are clamped, not rejected.
pub fn encode_frame(samples: &[f32]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}

/// Decode an i16le wire payload into float samples.
pub fn decode_frame(data: &[u8]) -> Result<Vec<f32>, SessionError> {
    if data.len() % 2 != 0 {
        return Err(SessionError::Protocol(format!(
            "audio payload has odd length {}",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect())
}

/// Normalized energy of a capture window for UI metering: RMS scaled 5x
/// and clamped into [0, 1].
pub fn meter_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum / samples.len() as f32).sqrt();
    (rms * 5.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_encodes_to_i16_max() {
        let bytes = encode_frame(&[1.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
    }

    #[test]
    fn out_of_range_samples_clamp() {
        let bytes = encode_frame(&[-1.5, 2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), -32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32767);
    }

    #[test]
    fn silence_encodes_to_zero() {
        let bytes = encode_frame(&[0.0, 0.0]);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert!(matches!(
            decode_frame(&[0x00, 0x01, 0x02]),
            Err(SessionError::Protocol(_))
        ));
    }

    #[test]
    fn decode_maps_i16_range_into_unit_floats() {
        let samples = decode_frame(&encode_frame(&[0.5, -0.5])).unwrap();
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!((samples[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn meter_level_is_bounded() {
        assert_eq!(meter_level(&[]), 0.0);
        assert_eq!(meter_level(&[0.0; 256]), 0.0);
        // A true RMS of 0.2 reports full scale.
        assert_eq!(meter_level(&[0.2; 256]), 1.0);
        assert_eq!(meter_level(&[100.0; 256]), 1.0);
        let quiet = meter_level(&[0.01; 256]);
        assert!(quiet > 0.0 && quiet < 1.0);
    }
}
