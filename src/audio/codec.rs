//! PCM codec for transport framing
//!
//! Captured f32 samples are scaled to 16-bit signed integers, serialized
//! little-endian, and base64-encoded for the wire. The inbound path inverts
//! the text transform and reinterprets little-endian i16 bytes as normalized
//! f32 samples. No dynamic range compression, no resampling.

use base64::Engine;

use super::capture::CAPTURE_SAMPLE_RATE;

/// An encoded audio frame ready for transport
#[derive(Debug, Clone)]
pub struct EncodedBlob {
    /// Base64-encoded little-endian 16-bit PCM
    pub data: String,

    /// MIME/encoding tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// A decoded audio buffer ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Normalized samples in [-1.0, 1.0], interleaved when multi-channel
    pub samples: Vec<f32>,

    /// Declared sample rate
    pub sample_rate: u32,

    /// Declared channel count
    pub channels: u16,
}

impl AudioBuffer {
    /// Duration of the buffer in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (f64::from(self.sample_rate) * f64::from(self.channels))
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encode captured samples as a transport blob
///
/// Each sample maps linearly from [-1.0, 1.0] to the 16-bit signed range;
/// out-of-range input is clamped, not wrapped.
#[must_use]
pub fn encode(samples: &[f32]) -> EncodedBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    EncodedBlob {
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
        mime_type: format!("audio/pcm;rate={CAPTURE_SAMPLE_RATE}"),
    }
}

/// Invert the wire text transform
///
/// Malformed input yields an empty vector: a bad chunk degrades to silence
/// for that chunk rather than terminating the session.
#[must_use]
pub fn decode(data: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .unwrap_or_default()
}

/// Reinterpret little-endian 16-bit PCM bytes as a playable buffer
///
/// A trailing odd byte is truncated rather than rejected.
#[must_use]
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioBuffer {
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    AudioBuffer {
        samples,
        sample_rate,
        channels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_mime_tag() {
        let blob = encode(&[0.0; 4]);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn test_roundtrip_within_quantization() {
        let original = vec![0.0, 0.5, -0.5, 0.25, -0.125];
        let blob = encode(&original);
        let bytes = decode(&blob.data);
        let buffer = decode_audio_data(&bytes, 16000, 1);

        assert_eq!(buffer.samples.len(), original.len());
        for (decoded, original) in buffer.samples.iter().zip(&original) {
            assert!((decoded - original).abs() <= 1.0 / 32768.0);
        }
    }

    #[test]
    fn test_out_of_range_samples_clamp() {
        let blob = encode(&[2.0, -2.0]);
        let buffer = decode_audio_data(&decode(&blob.data), 16000, 1);

        assert!((buffer.samples[0] - 32767.0 / 32768.0).abs() < f32::EPSILON);
        assert!((buffer.samples[1] + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_malformed_base64_degrades_to_silence() {
        assert!(decode("not valid base64!!!").is_empty());
    }

    #[test]
    fn test_odd_trailing_byte_truncated() {
        let buffer = decode_audio_data(&[0x00, 0x40, 0x7f], 24000, 1);
        assert_eq!(buffer.samples.len(), 1);
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer {
            samples: vec![0.0; 24000],
            sample_rate: 24000,
            channels: 1,
        };
        assert!((buffer.duration() - 1.0).abs() < f64::EPSILON);

        let stereo = AudioBuffer {
            samples: vec![0.0; 24000],
            sample_rate: 24000,
            channels: 2,
        };
        assert!((stereo.duration() - 0.5).abs() < f64::EPSILON);
    }
}
