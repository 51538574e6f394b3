//! PCM batch decoder
//!
//! Inflates a received audio payload and unpacks it into host-order samples.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::constants::MAX_DECOMPRESSED_AUDIO;
use crate::error::CodecError;

/// zlib decoder for received audio payloads
pub struct PcmDecoder {
    /// Inflate buffer (reused to avoid allocations)
    inflate_buffer: Vec<u8>,
    /// Largest accepted decompressed size
    max_size: usize,
    /// Payloads decoded
    payloads_decoded: u64,
    /// Payloads rejected
    payloads_rejected: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_DECOMPRESSED_AUDIO)
    }

    /// Create a decoder that rejects payloads inflating beyond `max_size` bytes
    pub fn with_limit(max_size: usize) -> Self {
        Self {
            inflate_buffer: Vec::new(),
            max_size,
            payloads_decoded: 0,
            payloads_rejected: 0,
            samples_produced: 0,
        }
    }

    /// Decode a compressed payload into samples
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, CodecError> {
        match self.inflate(payload) {
            Ok(samples) => {
                self.payloads_decoded += 1;
                self.samples_produced += samples.len() as u64;
                Ok(samples)
            }
            Err(e) => {
                self.payloads_rejected += 1;
                Err(e)
            }
        }
    }

    fn inflate(&mut self, payload: &[u8]) -> Result<Vec<i16>, CodecError> {
        self.inflate_buffer.clear();

        // read one byte past the cap so oversize payloads are detectable
        let limit = self.max_size as u64 + 1;
        ZlibDecoder::new(payload)
            .take(limit)
            .read_to_end(&mut self.inflate_buffer)
            .map_err(CodecError::DecompressionFailed)?;

        let len = self.inflate_buffer.len();
        if len > self.max_size {
            return Err(CodecError::TooLarge(self.max_size));
        }
        if len % 2 != 0 {
            return Err(CodecError::OddLength(len));
        }

        Ok(self
            .inflate_buffer
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            payloads_decoded: self.payloads_decoded,
            payloads_rejected: self.payloads_rejected,
            samples_produced: self.samples_produced,
        }
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub payloads_decoded: u64,
    pub payloads_rejected: u64,
    pub samples_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pack_samples, PcmEncoder};
    use bytes::BytesMut;

    fn compress(samples: &[i16]) -> Vec<u8> {
        let mut packed = BytesMut::new();
        pack_samples(samples, &mut packed);
        PcmEncoder::new(6).encode(&packed).unwrap().to_vec()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        // 440 Hz tone, one capture batch worth of samples
        let samples: Vec<i16> = (0..1024)
            .map(|i| {
                let t = i as f32 / 16_000.0;
                ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
            })
            .collect();

        let mut decoder = PcmDecoder::new();
        let decoded = decoder.decode(&compress(&samples)).unwrap();

        assert_eq!(decoded, samples);
        assert_eq!(decoder.stats().samples_produced, 1024);
    }

    #[test]
    fn test_rejects_garbage() {
        let mut decoder = PcmDecoder::new();
        assert!(matches!(
            decoder.decode(b"not zlib at all"),
            Err(CodecError::DecompressionFailed(_))
        ));
        assert_eq!(decoder.stats().payloads_rejected, 1);
    }

    #[test]
    fn test_rejects_odd_length() {
        let odd = PcmEncoder::new(6).encode(&[1, 2, 3]).unwrap();
        let mut decoder = PcmDecoder::new();
        assert!(matches!(decoder.decode(&odd), Err(CodecError::OddLength(3))));
    }

    #[test]
    fn test_rejects_oversize() {
        let mut decoder = PcmDecoder::with_limit(64);
        let big = compress(&[0i16; 64]);
        assert!(matches!(decoder.decode(&big), Err(CodecError::TooLarge(64))));

        let fits = compress(&[7i16; 32]);
        assert_eq!(decoder.decode(&fits).unwrap().len(), 32);
    }
}
