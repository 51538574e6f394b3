//! PCM batch encoder
//!
//! Packs host-order samples into network byte order and compresses
//! completed batches with zlib.

use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::CodecError;

/// Append `samples` to `out` as big-endian 16-bit PCM
pub fn pack_samples(samples: &[i16], out: &mut BytesMut) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.put_i16(sample);
    }
}

/// zlib encoder for packed PCM batches
pub struct PcmEncoder {
    level: Compression,
    /// Batches compressed
    batches_encoded: u64,
    /// Uncompressed bytes consumed
    bytes_in: u64,
    /// Compressed bytes produced
    bytes_out: u64,
}

impl PcmEncoder {
    /// Create an encoder with a zlib level (0-9)
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
            batches_encoded: 0,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Compress one packed batch
    pub fn encode(&mut self, packed: &[u8]) -> Result<Bytes, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(packed.len() / 2), self.level);
        encoder
            .write_all(packed)
            .map_err(CodecError::CompressionFailed)?;
        let compressed = encoder.finish().map_err(CodecError::CompressionFailed)?;

        self.batches_encoded += 1;
        self.bytes_in += packed.len() as u64;
        self.bytes_out += compressed.len() as u64;

        Ok(Bytes::from(compressed))
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            batches_encoded: self.batches_encoded,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
        }
    }
}

impl Default for PcmEncoder {
    fn default() -> Self {
        Self::new(Compression::default().level())
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub batches_encoded: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl EncoderStats {
    /// Compressed size over uncompressed size
    pub fn ratio(&self) -> f32 {
        if self.bytes_in == 0 {
            1.0
        } else {
            self.bytes_out as f32 / self.bytes_in as f32
        }
    }
}
