//! PCM frame types and the float <-> 16-bit conversions used on the wire.
//!
//! - Outbound: f32 samples → clamp → ×32767 → round → i16 little-endian
//! - Inbound: i16 little-endian → ÷32768 → f32

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::{LinkError, Result};

/// Capture rate expected by the remote session.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;
/// Rate of the audio streamed back by the remote session.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;
/// Samples per captured frame (16 ms at 16 kHz).
pub const CAPTURE_FRAME_SIZE: usize = 256;

/// One fixed-size block of mono float samples from the input device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u32,
    /// Position of this frame within its capture run
    pub sequence: u64,
    /// Clock time at which the frame was read, in seconds
    pub timestamp: f64,
}

impl AudioFrame {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// One outbound chunk: raw PCM16 bytes plus their MIME descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: Bytes,
}

impl EncodedChunk {
    /// Encode float samples as `audio/pcm;rate=<sample_rate>`.
    pub fn pcm16(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
            data: Bytes::from(encode_pcm16(samples)),
        }
    }

    /// Base64 payload as carried by the transport.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// An inbound chunk exactly as it came off the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudio {
    pub mime_type: String,
    /// Base64 encoded payload
    pub data: String,
}

/// Playback-ready samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate as f64
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Parse `audio/pcm` or `audio/pcm;rate=N`. Returns the declared rate, if any.
pub fn parse_pcm_mime_type(mime: &str) -> Result<Option<u32>> {
    let mut parts = mime.split(';').map(str::trim);
    let kind = parts.next().unwrap_or_default();
    if !kind.eq_ignore_ascii_case("audio/pcm") {
        return Err(LinkError::Decode(format!("unsupported mime type '{}'", mime)));
    }

    let mut rate = None;
    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("rate") {
                let parsed = value.trim().parse::<u32>().map_err(|_| {
                    LinkError::Decode(format!("invalid rate in mime type '{}'", mime))
                })?;
                rate = Some(parsed);
            }
        }
    }
    Ok(rate)
}

/// Convert one float sample to PCM16.
pub fn float_to_i16(sample: f32) -> i16 {
    // NaN clamps to 0
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * 32767.0).round() as i16
}

pub fn i16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&float_to_i16(s).to_le_bytes());
    }
    out
}

pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(LinkError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16_to_float(i16::from_le_bytes([b[0], b[1]])))
        .collect())
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| LinkError::Decode(format!("invalid base64 payload: {}", e)))
}

/// Linear interpolation resampler, used only for the self-monitor path.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_i16_scaling_and_clamp() {
        assert_eq!(float_to_i16(0.0), 0);
        assert_eq!(float_to_i16(1.0), 32767);
        assert_eq!(float_to_i16(-1.0), -32767);
        assert_eq!(float_to_i16(0.5), 16384); // 16383.5 rounds away from zero
        assert_eq!(float_to_i16(3.0), 32767);
        assert_eq!(float_to_i16(-7.5), -32767);
        assert_eq!(float_to_i16(f32::NAN), 0);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let bytes = encode_pcm16(&[1.0, -1.0]);
        assert_eq!(bytes, vec![0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn test_round_trip_within_one_step() {
        // Encode scales by 32767 and decode divides by 32768, so the error
        // grows with amplitude; up to half scale it stays within one step.
        let input: Vec<f32> = (0..512)
            .map(|i| ((i as f32) * 0.05).sin() * 0.5)
            .collect();
        let decoded = decode_pcm16(&encode_pcm16(&input)).unwrap();
        assert_eq!(decoded.len(), input.len());
        for (a, b) in input.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= 1.0 / 32768.0 + 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert!(matches!(decode_pcm16(&[0, 1, 2]), Err(LinkError::Decode(_))));
    }

    #[test]
    fn test_chunk_mime_and_base64() {
        let chunk = EncodedChunk::pcm16(&[0.0; 256], CAPTURE_SAMPLE_RATE);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(chunk.data.len(), 512);
        assert_eq!(decode_base64(&chunk.to_base64()).unwrap().len(), 512);
    }

    #[test]
    fn test_parse_mime_type() {
        assert_eq!(parse_pcm_mime_type("audio/pcm").unwrap(), None);
        assert_eq!(parse_pcm_mime_type("audio/pcm;rate=24000").unwrap(), Some(24000));
        assert_eq!(parse_pcm_mime_type("audio/PCM; rate=16000").unwrap(), Some(16000));
        assert!(parse_pcm_mime_type("audio/opus").is_err());
        assert!(parse_pcm_mime_type("audio/pcm;rate=fast").is_err());
    }

    #[test]
    fn test_decoded_buffer_duration() {
        let buffer = DecodedBuffer::new(vec![0.0; 12000], PLAYBACK_SAMPLE_RATE);
        assert_eq!(buffer.sample_count(), 12000);
        assert!((buffer.duration_seconds() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_resample_linear_length() {
        let out = resample_linear(&[0.0; 256], 16000, 24000);
        assert_eq!(out.len(), 384);
        let same = resample_linear(&[0.25, 0.5], 24000, 24000);
        assert_eq!(same, vec![0.25, 0.5]);
    }
}
