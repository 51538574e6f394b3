//! Audio pipeline: local capture plus a registry of remote speakers

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::capture::{AudioCapture, CaptureStats};
use crate::audio::device::{AudioBackend, StreamFormat};
use crate::audio::playback::{SpeakerStats, SpeakerStream};
use crate::config::AudioConfig;
use crate::error::CodecError;

/// Capture and playback for one session
pub struct AudioPipeline {
    backend: Arc<dyn AudioBackend>,
    format: StreamFormat,
    delay: Duration,

    capture: Option<AudioCapture>,
    batches: Receiver<Bytes>,
    // keeps `batches` connected when capture is absent or has stopped
    _batches_tx: Sender<Bytes>,

    /// Playback streams keyed by remote username
    speakers: DashMap<String, SpeakerStream>,
    stopped: bool,
}

impl AudioPipeline {
    /// Start capture on `backend`. A capture failure leaves the pipeline
    /// receive-only.
    pub fn start(config: &AudioConfig, backend: Arc<dyn AudioBackend>) -> Self {
        let format = config.format();
        let (tx, rx) = unbounded();

        let capture = match AudioCapture::start(
            backend.as_ref(),
            format,
            config.batch_bytes,
            config.compression_level,
            tx.clone(),
        ) {
            Ok(capture) => Some(capture),
            Err(e) => {
                tracing::warn!("Audio capture unavailable, receive only: {}", e);
                None
            }
        };

        Self {
            backend,
            format,
            delay: config.playback_delay(),
            capture,
            batches: rx,
            _batches_tx: tx,
            speakers: DashMap::new(),
            stopped: false,
        }
    }

    /// Completed capture batches, ready to broadcast
    pub fn batches(&self) -> &Receiver<Bytes> {
        &self.batches
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.capture.as_ref().map(|c| c.stats())
    }

    /// Route a received payload to `username`'s stream, creating it on the
    /// first payload from that speaker
    pub fn play(&self, username: &str, payload: &[u8]) -> Result<(), CodecError> {
        let mut speaker = self
            .speakers
            .entry(username.to_string())
            .or_insert_with(|| self.open_speaker(username));
        speaker.push_payload(payload).map(|_| ())
    }

    fn open_speaker(&self, username: &str) -> SpeakerStream {
        // one second of headroom between the scheduler and the device
        let capacity = self.format.sample_rate as usize;
        match SpeakerStream::open(
            username,
            self.backend.as_ref(),
            self.format,
            self.delay,
            capacity,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("No playback for {}: {}", username, e);
                SpeakerStream::muted(username)
            }
        }
    }

    /// Usernames with a playback stream
    pub fn speakers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.speakers.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    pub fn speaker_stats(&self, username: &str) -> Option<SpeakerStats> {
        self.speakers.get(username).map(|s| s.stats())
    }

    /// Close streams that received nothing for `idle`. Returns how many.
    pub fn reap_idle(&self, idle: Duration) -> usize {
        let before = self.speakers.len();
        self.speakers.retain(|username, stream| {
            let keep = stream.last_activity().elapsed() < idle;
            if !keep {
                tracing::info!("Closing idle playback stream for {}", username);
            }
            keep
        });
        before - self.speakers.len()
    }

    /// Stop capture and every playback stream. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        let count = self.speakers.len();
        self.speakers.clear();
        tracing::info!("Audio pipeline stopped ({} speakers)", count);
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
