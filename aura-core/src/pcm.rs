//! PCM16 wire codec.
//!
//! Upstream (microphone) audio is sent as 16 kHz mono, downstream (agent speech)
//! arrives as 24 kHz mono. Both directions use signed 16-bit little-endian PCM
//! wrapped in standard base64.

use base64::Engine;
use thiserror::Error;

pub const INPUT_SAMPLE_RATE_HZ: u32 = 16_000;
pub const OUTPUT_SAMPLE_RATE_HZ: u32 = 24_000;
pub const UPSTREAM_MIME_TYPE: &str = "audio/pcm;rate=16000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(String),

    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),

    #[error("{samples} samples do not divide into {channels} channel frames")]
    PartialFrame { samples: usize, channels: u16 },

    #[error("invalid audio format: {0}")]
    Format(&'static str),
}

/// A decoded, playable buffer. One sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate_hz: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn mono(sample_rate_hz: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate_hz,
            channels: vec![samples],
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate_hz as f64
    }

    /// Down-mix to a single channel.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Convert float samples to PCM16 little-endian bytes, clamping to [-1, 1].
pub fn encode_pcm_s16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
        let i = (v * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&i.to_le_bytes());
    }
    out
}

/// Encode float samples into the transport representation (base64 PCM16).
pub fn encode(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(encode_pcm_s16le(samples))
}

/// Strip the transport framing from a received audio payload.
pub fn decode(payload: &str) -> Result<Vec<u8>, DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Rebuild a playable buffer from interleaved PCM16 little-endian bytes.
pub fn decode_audio_data(
    bytes: &[u8],
    sample_rate_hz: u32,
    channel_count: u16,
) -> Result<AudioBuffer, DecodeError> {
    if channel_count == 0 {
        return Err(DecodeError::Format("channel count must be non-zero"));
    }
    if sample_rate_hz == 0 {
        return Err(DecodeError::Format("sample rate must be non-zero"));
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    let samples = bytes.len() / 2;
    let channels = channel_count as usize;
    if samples % channels != 0 {
        return Err(DecodeError::PartialFrame {
            samples,
            channels: channel_count,
        });
    }

    let frames = samples / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let v = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(v as f32 / 32768.0);
    }

    Ok(AudioBuffer {
        sample_rate_hz,
        channels: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = encode_pcm_s16le(&[2.0, -2.0, 0.0]);
        assert_eq!(&bytes[0..2], &i16::MAX.to_le_bytes());
        assert_eq!(&bytes[2..4], &(-i16::MAX).to_le_bytes());
        assert_eq!(&bytes[4..6], &[0, 0]);
    }

    #[test]
    fn encode_is_little_endian() {
        // 0.5 * 32767 = 16383.5 -> 16384 = 0x4000
        let bytes = encode_pcm_s16le(&[0.5]);
        assert_eq!(bytes, vec![0x00, 0x40]);
    }

    #[test]
    fn decode_round_trips_within_quantization_error() {
        let samples: Vec<f32> = (0..480)
            .map(|i| ((i as f32) * 0.037).sin() * 0.9)
            .collect();
        let wire = encode(&samples);
        let buf = decode_audio_data(&decode(&wire).unwrap(), OUTPUT_SAMPLE_RATE_HZ, 1).unwrap();

        assert_eq!(buf.frames(), samples.len());
        for (a, b) in samples.iter().zip(buf.channels[0].iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 2.0 / 32768.0);
        }
    }

    #[test]
    fn decode_rejects_odd_byte_length() {
        let err = decode_audio_data(&[0, 1, 2], OUTPUT_SAMPLE_RATE_HZ, 1).unwrap_err();
        assert_eq!(err, DecodeError::OddLength(3));
    }

    #[test]
    fn decode_rejects_partial_stereo_frame() {
        let err = decode_audio_data(&[0, 0, 0, 0, 0, 0], OUTPUT_SAMPLE_RATE_HZ, 2).unwrap_err();
        assert!(matches!(err, DecodeError::PartialFrame { samples: 3, channels: 2 }));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(matches!(decode("not base64!"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn duration_follows_sample_rate() {
        let buf = decode_audio_data(&vec![0u8; 48_000], OUTPUT_SAMPLE_RATE_HZ, 1).unwrap();
        assert_abs_diff_eq!(buf.duration(), 1.0);
    }

    #[test]
    fn stereo_is_deinterleaved_and_downmixed() {
        let mut bytes = Vec::new();
        for v in [16384i16, -16384, 16384, -16384] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let buf = decode_audio_data(&bytes, OUTPUT_SAMPLE_RATE_HZ, 2).unwrap();
        assert_eq!(buf.channels.len(), 2);
        assert_eq!(buf.frames(), 2);
        assert_abs_diff_eq!(buf.channels[0][0], 0.5);
        assert_abs_diff_eq!(buf.channels[1][0], -0.5);
        assert_eq!(buf.to_mono(), vec![0.0, 0.0]);
    }
}
