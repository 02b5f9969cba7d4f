//! Pure PCM transforms between capture frames and the wire representation.
//!
//! - Outbound: interleaved i16 samples → little-endian bytes → base64
//! - Inbound: base64 → little-endian bytes → i16 samples + duration
//!
//! Both directions are stateless and deterministic. Decode failures are
//! reported as `MalformedAudioData` and the caller drops the chunk.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::SessionError;

/// One fixed-length frame of captured audio.
///
/// `seq` increases monotonically per session and is for diagnostics only;
/// ordering is guaranteed by the channel, not by this number.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub seq: u64,
}

/// One decoded buffer of inbound audio, ready for the playback scheduler.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Length of the buffer in seconds at `sample_rate`.
    pub duration: f64,
}

/// Encode one capture frame into the text-safe wire payload.
pub fn encode_frame(frame: &AudioFrame) -> String {
    let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
    for sample in &frame.samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a wire payload into a playable buffer at `sample_rate`.
pub fn decode_chunk(data: &str, sample_rate: u32) -> Result<PlaybackChunk, SessionError> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| SessionError::MalformedAudioData(e.to_string()))?;

    if bytes.is_empty() {
        return Err(SessionError::MalformedAudioData("empty payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(SessionError::MalformedAudioData(format!(
            "truncated payload: {} bytes",
            bytes.len()
        )));
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let duration = samples.len() as f64 / sample_rate as f64;

    Ok(PlaybackChunk {
        samples,
        sample_rate,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_round_trips() {
        let frame = AudioFrame {
            samples: vec![0i16; 960],
            sample_rate: 16000,
            seq: 0,
        };
        let encoded = encode_frame(&frame);
        let chunk = decode_chunk(&encoded, 16000).unwrap();

        assert_eq!(chunk.samples.len(), 960);
        assert!(chunk.samples.iter().all(|&s| s == 0));
        assert!((chunk.duration - 0.06).abs() < 1e-9);
    }

    #[test]
    fn signal_round_trips() {
        let frame = AudioFrame {
            samples: vec![-32768, -1, 0, 1, 32767],
            sample_rate: 16000,
            seq: 7,
        };
        let chunk = decode_chunk(&encode_frame(&frame), 16000).unwrap();
        assert_eq!(chunk.samples, frame.samples);
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let err = decode_chunk("not base64!!", 24000).unwrap_err();
        assert!(matches!(err, SessionError::MalformedAudioData(_)));
    }

    #[test]
    fn odd_byte_count_is_malformed() {
        // 3 raw bytes: cannot split into i16 samples
        let data = BASE64.encode([1u8, 2, 3]);
        let err = decode_chunk(&data, 24000).unwrap_err();
        assert!(matches!(err, SessionError::MalformedAudioData(_)));
    }

    #[test]
    fn empty_payload_is_malformed() {
        let err = decode_chunk("", 24000).unwrap_err();
        assert!(matches!(err, SessionError::MalformedAudioData(_)));
    }

    #[test]
    fn half_second_chunk_duration() {
        let frame = AudioFrame {
            samples: vec![0i16; 12000],
            sample_rate: 24000,
            seq: 0,
        };
        let chunk = decode_chunk(&encode_frame(&frame), 24000).unwrap();
        assert!((chunk.duration - 0.5).abs() < 1e-9);
    }
}
