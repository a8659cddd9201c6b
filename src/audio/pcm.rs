//! PCM wire codec.
//!
//! The live endpoint exchanges raw 16-bit little-endian PCM wrapped in
//! base64: 16 kHz mono out (microphone), 24 kHz mono in (response audio).
//! Conversion is the usual i16 ⇄ f32 scaling, saturating on encode rather
//! than wrapping on out-of-range floats.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, VoiceError};

/// One decoded audio payload plus the rate it was sampled at.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback duration of this payload.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Encode f32 samples in [-1, 1] as base64-wrapped PCM16 LE.
pub fn encode_base64(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample as f64 * 32768.0).round().clamp(-32768.0, 32767.0);
        bytes.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    BASE64.encode(&bytes)
}

/// Decode a base64-wrapped PCM16 LE payload back to f32 samples.
///
/// Fails with [`VoiceError::MalformedAudio`] on invalid base64 or an odd
/// byte count (a truncated sample).
pub fn decode_base64(data: &str, sample_rate: u32) -> Result<DecodedAudio> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| VoiceError::MalformedAudio(format!("invalid base64: {}", e)))?;

    if bytes.len() % 2 != 0 {
        return Err(VoiceError::MalformedAudio(format!(
            "odd byte count: {}",
            bytes.len()
        )));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
