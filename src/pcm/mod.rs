//! PCM16 codec and transport encoding.
//!
//! The wire protocol carries 16-bit signed little-endian PCM inside base64
//! text fields, tagged with a MIME string such as `audio/pcm;rate=16000`.
//! This module converts between normalized f32 samples and that
//! representation. Quantization to 16 bits loses up to one LSB of
//! precision; round-tripping within 1/32768 is the accepted contract.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// One encoded audio frame ready for transmission: PCM16 bytes plus the
/// MIME tag the remote agent expects.
#[derive(Debug, Clone)]
pub struct WireAudioPacket {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// An inbound PCM16 buffer whose length does not line up with its declared
/// channel count. The segment is dropped; the session continues.
#[derive(Debug)]
pub struct MalformedAudioError {
    pub byte_len: usize,
    pub channels: u16,
}

impl std::fmt::Display for MalformedAudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PCM16 buffer of {} bytes is not a multiple of {} ({} channel(s), 2 bytes per sample)",
            self.byte_len,
            2 * self.channels.max(1) as usize,
            self.channels
        )
    }
}

impl std::error::Error for MalformedAudioError {}

/// Encode normalized samples as 16-bit signed little-endian PCM.
///
/// Each sample is scaled by 32768 and clamped to the representable range,
/// so +1.0 maps to 32767 and -1.0 maps to -32768. Multi-channel input is
/// expected channel-interleaved and stays interleaved in the output.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode little-endian PCM16 bytes to normalized f32 samples.
///
/// Fails if the byte length is not a whole number of interleaved sample
/// frames for the declared channel count.
pub fn decode_pcm16(bytes: &[u8], channels: u16) -> Result<Vec<f32>, MalformedAudioError> {
    let stride = 2 * channels.max(1) as usize;
    if bytes.len() % stride != 0 {
        return Err(MalformedAudioError {
            byte_len: bytes.len(),
            channels,
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Build the wire packet for one capture frame.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> WireAudioPacket {
    WireAudioPacket {
        data: encode_pcm16(samples),
        mime_type: format!("audio/pcm;rate={sample_rate}"),
    }
}

/// Encode bytes for the text-oriented transport (standard base64).
pub fn to_transport_text(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`to_transport_text`]. Exact round-trip for any input.
pub fn from_transport_text(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_text_round_trip() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0xff],
            vec![1, 2, 3],
            vec![0, 127, 128, 255, 42],
            (0..=255).collect(),
        ];
        for bytes in cases {
            let text = to_transport_text(&bytes);
            assert_eq!(from_transport_text(&text).unwrap(), bytes);
        }
    }

    #[test]
    fn test_transport_text_rejects_garbage() {
        assert!(from_transport_text("not base64!!").is_err());
    }

    #[test]
    fn test_encode_is_little_endian() {
        // 0.5 * 32768 = 16384 = 0x4000 -> bytes [0x00, 0x40]
        let bytes = encode_pcm16(&[0.5]);
        assert_eq!(bytes, vec![0x00, 0x40]);
    }

    #[test]
    fn test_encode_clamps_full_scale() {
        let bytes = encode_pcm16(&[1.0, -1.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }

    #[test]
    fn test_quantization_error_within_one_lsb() {
        let samples: Vec<f32> = (-100..=100).map(|i| i as f32 / 100.0).collect();
        let decoded = decode_pcm16(&encode_pcm16(&samples), 1).unwrap();
        for (orig, round_tripped) in samples.iter().zip(decoded.iter()) {
            let err = (orig - round_tripped).abs();
            assert!(
                err <= 1.0 / 32768.0,
                "sample {orig} round-tripped to {round_tripped} (error {err})"
            );
        }
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        assert!(decode_pcm16(&[0x00, 0x01, 0x02], 1).is_err());
        // 6 bytes is 3 mono samples but 1.5 stereo frames.
        assert!(decode_pcm16(&[0; 6], 2).is_err());
        assert!(decode_pcm16(&[0; 8], 2).is_ok());
    }

    #[test]
    fn test_decode_empty_is_empty() {
        assert!(decode_pcm16(&[], 1).unwrap().is_empty());
    }

    #[test]
    fn test_encode_frame_mime_tag() {
        let packet = encode_frame(&[0.0; 4], 16_000);
        assert_eq!(packet.mime_type, "audio/pcm;rate=16000");
        assert_eq!(packet.data.len(), 8);
    }
}
