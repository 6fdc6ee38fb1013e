//! PCM16 codec and base64 transport framing.
//!
//! Wire format is fixed: signed 16-bit little-endian mono. Capture runs at
//! 16 kHz, playback at 24 kHz.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::CodecError;

/// Microphone sample rate sent to the remote session.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized audio coming back.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// MIME type attached to every outbound packet.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

const SCALE: f32 = 32768.0;

/// Quantize one normalized sample.
///
/// The sample is clamped to [-1, 1] first and the product is clamped to the
/// i16 range, so `1.0` becomes `32767` rather than wrapping.
pub fn sample_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn sample_from_i16(v: i16) -> f32 {
    v as f32 / SCALE
}

/// Quantize normalized samples to PCM16 LE bytes.
pub fn encode(samples: &[f32]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    Bytes::from(out)
}

/// Convert PCM16 LE bytes back to normalized samples.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| sample_from_i16(i16::from_le_bytes([c[0], c[1]])))
        .collect())
}

/// Base64-frame raw PCM bytes for the JSON transport.
pub fn to_transport(pcm: &[u8]) -> String {
    STANDARD.encode(pcm)
}

/// Strip base64 framing from an inbound audio payload.
pub fn from_transport(data: &str) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(STANDARD.decode(data)?))
}

/// Check that an inbound MIME type is PCM at the playback rate.
///
/// A missing `rate` parameter is accepted; the session only ever speaks
/// 24 kHz when it omits it.
pub fn check_playback_mime(mime_type: &str) -> Result<(), CodecError> {
    let mut parts = mime_type.split(';').map(str::trim);
    if parts.next() != Some("audio/pcm") {
        return Err(CodecError::UnsupportedFormat(mime_type.to_string()));
    }
    for param in parts {
        if let Some(rate) = param.strip_prefix("rate=") {
            if rate.parse::<u32>().ok() != Some(PLAYBACK_SAMPLE_RATE) {
                return Err(CodecError::UnsupportedFormat(mime_type.to_string()));
            }
        }
    }
    Ok(())
}

/// Duration in seconds of `samples` mono samples at `rate`.
pub fn duration_secs(samples: usize, rate: u32) -> f64 {
    samples as f64 / rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_of_encode_is_within_one_step() {
        let input: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.97)
            .chain([-1.0, 0.0, 0.5, -0.5, 1.0 - 1.0 / 32768.0])
            .collect();

        let output = decode(&encode(&input)).unwrap();

        assert_eq!(output.len(), input.len());
        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn encode_is_little_endian() {
        let bytes = encode(&[0.5, -1.0]);
        assert_eq!(&bytes[..], &[0x00, 0x40, 0x00, 0x80]);
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = encode(&[1.0, 3.5, -7.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MAX, i16::MIN]);
    }

    #[test]
    fn device_samples_survive_a_round_trip() {
        for v in [i16::MIN, -12345, -1, 0, 1, 16384, i16::MAX] {
            assert_eq!(sample_to_i16(sample_from_i16(v)), v);
        }
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(-0.5), -16384);
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert_eq!(decode(&[0, 1, 2]), Err(CodecError::OddLength(3)));
    }

    #[test]
    fn transport_framing_rejects_garbage() {
        let framed = to_transport(&encode(&[0.25]));
        assert_eq!(from_transport(&framed).unwrap(), encode(&[0.25]));
        assert!(matches!(
            from_transport("not base64!!"),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn playback_mime_must_be_24k_pcm() {
        assert!(check_playback_mime("audio/pcm;rate=24000").is_ok());
        assert!(check_playback_mime("audio/pcm").is_ok());
        assert!(check_playback_mime("audio/pcm;rate=16000").is_err());
        assert!(check_playback_mime("audio/opus").is_err());
    }

    #[test]
    fn hundred_ms_at_playback_rate() {
        assert!((duration_secs(2400, PLAYBACK_SAMPLE_RATE) - 0.1).abs() < 1e-12);
    }
}
