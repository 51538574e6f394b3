//! # peerchat
//!
//! Serverless multi-party text and voice chat. Every participant runs the
//! same process: it publishes its own frames on a local endpoint and
//! subscribes to every configured peer, filtered by a shared room code.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              PEER PROCESS                                 │
//! │                                                                          │
//! │  ┌────────────┐   ┌─────────────────────┐                                │
//! │  │ Microphone │──▶│ Capture (audio::     │  i16 samples, lock-free queue  │
//! │  └────────────┘   │ capture) drain task  │──▶ BE pack ─▶ 2048 B ─▶ zlib    │
//! │                   └──────────┬──────────┘                                │
//! │  ┌────────────┐              │ batches                                   │
//! │  │  Console   │── lines ──┐  ▼                                           │
//! │  └────────────┘          ┌┴─────────────────────────────┐                │
//! │                          │  Session controller (poll)   │                │
//! │                          │  route Text / Audio / Video  │                │
//! │                          └┬──────────────▲──────────────┘                │
//! │            Frame::encode  │              │ Frame::decode                 │
//! │                           ▼              │                               │
//! │  ┌────────────────────────────┐   ┌──────┴─────────────────────────┐     │
//! │  │ Publisher (network)        │   │ Subscriber per peer (network)  │     │
//! │  │ topic-filtered fan-out     │   │ room code subscription         │     │
//! │  └────────────┬───────────────┘   └──────▲─────────────────────────┘     │
//! └───────────────┼──────────────────────────┼───────────────────────────────┘
//!                 │ TCP                       │ TCP
//!                 ▼                           │
//!            other peers                 other peers
//!
//!   Playback, one per remote username (audio::playback):
//!
//!   payload ─▶ zlib inflate ─▶ BE unpack ─▶ jitter buffer (arrival + 50 ms)
//!           ─▶ playback-ready queue ─▶ device callback (repeat last on underrun)
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Audio sample rate on the wire
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Audio is always mono
    pub const CHANNELS: u16 = 1;

    /// Uncompressed bytes accumulated before a capture batch is compressed and sent
    pub const AUDIO_BATCH_BYTES: usize = 2048;

    /// Minimum time a received sample is held before it may be played
    pub const PLAYBACK_DELAY: Duration = Duration::from_millis(50);

    /// How long pipeline tasks block on their input queue before re-checking shutdown
    pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Controller poll timeout
    pub const SESSION_POLL_TIMEOUT: Duration = Duration::from_millis(500);

    /// Default local bind address
    pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:2001";

    /// Room codes are exactly this many ASCII bytes
    pub const ROOM_CODE_LEN: usize = 5;

    /// Upper bound on a single transport message
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

    /// Upper bound on a decompressed audio payload
    pub const MAX_DECOMPRESSED_AUDIO: usize = 1024 * 1024;

    /// Default per-subscriber / per-peer queue depth, in messages
    pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

    /// Delay between reconnection attempts to an absent peer
    pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);
}
