//! Error types for peerchat

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire frame errors, raised while decoding or while building identities
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes, need at least 7")]
    TooShort(usize),

    #[error("Username length {declared} exceeds remaining {remaining} bytes")]
    UsernameOverrun { declared: usize, remaining: usize },

    #[error("Non-ASCII bytes in {0}")]
    NonAscii(&'static str),

    #[error("Unknown media type: {0}")]
    UnknownMediaType(u8),

    #[error("Invalid room code {0:?}: must be exactly 5 ASCII characters")]
    InvalidRoomCode(String),

    #[error("Invalid username {0:?}: must be ASCII and at most 255 bytes")]
    InvalidUsername(String),
}

/// Audio payload codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression failed: {0}")]
    CompressionFailed(std::io::Error),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(std::io::Error),

    #[error("Decompressed payload has odd length {0}")]
    OddLength(usize),

    #[error("Decompressed payload exceeds {0} bytes")]
    TooLarge(usize),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Bind to {address} failed: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Transport is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Audio backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to spawn audio thread: {0}")]
    Spawn(std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Identity(#[from] FrameError),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
