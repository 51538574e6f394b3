//! Audio payload codec
//!
//! Captured PCM is packed big-endian and compressed as one zlib stream per
//! batch. The compression is generic and lossless; there is no audio codec.

pub mod decoder;
pub mod encoder;

pub use decoder::{DecoderStats, PcmDecoder};
pub use encoder::{pack_samples, EncoderStats, PcmEncoder};
