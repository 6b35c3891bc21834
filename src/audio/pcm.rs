use base64::{engine::general_purpose, Engine as _};

use crate::error::SyncError;

/// Decodes a base64 audio field into raw little-endian PCM16 bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, SyncError> {
    Ok(general_purpose::STANDARD.decode(data.trim())?)
}

/// PCM16 LE mono -> normalized f32. A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Number of mono samples in a PCM16 payload.
pub fn pcm16_sample_count(bytes: &[u8]) -> usize {
    bytes.len() / 2
}

/// Playback length of a PCM16 payload at `sample_rate`, in seconds.
pub fn pcm16_duration(bytes: &[u8], sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    pcm16_sample_count(bytes) as f64 / sample_rate as f64
}
