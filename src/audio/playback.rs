//! Per-speaker playback stream
//!
//! Each remote username gets its own decoder, jitter buffer, scheduler
//! thread and output device, so one speaker's stalls or bad payloads never
//! touch another's.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{
    jitter_buffer, JitterBuffer, JitterEntry, JitterInput, PlaybackFeed, PlaybackQueue,
    Release, SharedPlaybackQueue,
};
use crate::audio::device::{AudioBackend, DeviceHandle, StreamFormat};
use crate::codec::PcmDecoder;
use crate::constants::QUEUE_POLL_INTERVAL;
use crate::error::{AudioError, CodecError};

/// Wait between retries while the playback-ready queue is full
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Playback state for one remote speaker
pub struct SpeakerStream {
    username: String,
    decoder: PcmDecoder,

    /// Producer side of the jitter buffer; `None` when muted or stopped
    input: Option<JitterInput>,
    queue: Option<SharedPlaybackQueue>,
    device: Option<DeviceHandle>,
    scheduler: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,

    last_activity: Instant,
    payloads_received: u64,
    payloads_malformed: u64,
    samples_released: Arc<AtomicU64>,
}

impl SpeakerStream {
    /// Open an output device for `username` and start its scheduler
    pub fn open(
        username: &str,
        backend: &dyn AudioBackend,
        format: StreamFormat,
        delay: Duration,
        queue_capacity: usize,
    ) -> Result<Self, AudioError> {
        let queue: SharedPlaybackQueue = Arc::new(PlaybackQueue::new(queue_capacity));

        let mut feed = PlaybackFeed::new(queue.clone());
        let device = backend.open_output(
            username,
            format,
            Box::new(move |out: &mut [i16]| {
                feed.fill(out);
            }),
        )?;

        let (input, buffer) = jitter_buffer(delay);
        let shutdown = Arc::new(AtomicBool::new(false));
        let samples_released = Arc::new(AtomicU64::new(0));

        let scheduler = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let device_running = device.running_flag();
            let released = samples_released.clone();
            let name = username.to_string();
            thread::Builder::new()
                .name(format!("jitter-{}", username))
                .spawn(move || {
                    let stop = || {
                        shutdown.load(Ordering::Relaxed) || !device_running.load(Ordering::Relaxed)
                    };
                    schedule(buffer, &queue, &released, stop);
                    tracing::debug!("Playback scheduler for {} stopped", name);
                })
                .map_err(AudioError::Spawn)?
        };

        tracing::info!("Opened playback stream for {}", username);

        Ok(Self {
            username: username.to_string(),
            decoder: PcmDecoder::new(),
            input: Some(input),
            queue: Some(queue),
            device: Some(device),
            scheduler: Some(scheduler),
            shutdown,
            last_activity: Instant::now(),
            payloads_received: 0,
            payloads_malformed: 0,
            samples_released,
        })
    }

    /// A stream with no device: payloads are decoded and discarded
    pub fn muted(username: &str) -> Self {
        Self {
            username: username.to_string(),
            decoder: PcmDecoder::new(),
            input: None,
            queue: None,
            device: None,
            scheduler: None,
            shutdown: Arc::new(AtomicBool::new(true)),
            last_activity: Instant::now(),
            payloads_received: 0,
            payloads_malformed: 0,
            samples_released: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether received audio reaches a device
    pub fn is_audible(&self) -> bool {
        self.input.is_some() && self.device.as_ref().is_some_and(|d| d.is_running())
    }

    /// Decode one compressed payload and queue it for delayed playback.
    ///
    /// Returns the number of samples it carried. A malformed payload is
    /// counted and reported; the stream keeps going.
    pub fn push_payload(&mut self, payload: &[u8]) -> Result<usize, CodecError> {
        let arrived_at = Instant::now();
        self.last_activity = arrived_at;
        self.payloads_received += 1;

        let samples = match self.decoder.decode(payload) {
            Ok(samples) => samples,
            Err(e) => {
                self.payloads_malformed += 1;
                return Err(e);
            }
        };

        let count = samples.len();
        if let Some(input) = &self.input {
            if !input.push(JitterEntry::new(samples, arrived_at)) {
                tracing::debug!("Playback for {} has stopped, muting", self.username);
                self.input = None;
            }
        }
        Ok(count)
    }

    /// When the last payload (valid or not) arrived
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Get statistics
    pub fn stats(&self) -> SpeakerStats {
        SpeakerStats {
            payloads_received: self.payloads_received,
            payloads_malformed: self.payloads_malformed,
            samples_released: self.samples_released.load(Ordering::Relaxed),
            underruns: self.queue.as_ref().map_or(0, |q| q.underrun_count()),
            queued_samples: self.queue.as_ref().map_or(0, |q| q.len()),
        }
    }

    /// Stop the scheduler and close the device. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.input = None;
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
    }
}

impl Drop for SpeakerStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-speaker statistics
#[derive(Debug, Clone, Default)]
pub struct SpeakerStats {
    pub payloads_received: u64,
    pub payloads_malformed: u64,
    pub samples_released: u64,
    pub underruns: u64,
    pub queued_samples: usize,
}

/// Move entries from the jitter buffer into the playback-ready queue until
/// `stop` turns true or the buffer closes
fn schedule<F>(mut buffer: JitterBuffer, queue: &PlaybackQueue, released: &AtomicU64, stop: F)
where
    F: Fn() -> bool,
{
    while !stop() {
        let entry = match buffer.next_release(QUEUE_POLL_INTERVAL) {
            Release::Ready(entry) => entry,
            Release::Idle => continue,
            Release::Closed => return,
        };

        let count = entry.samples.len() as u64;
        for sample in entry.samples {
            let mut pending = sample;
            while let Err(rejected) = queue.push(pending) {
                if stop() {
                    return;
                }
                pending = rejected;
                thread::sleep(QUEUE_FULL_BACKOFF);
            }
        }
        released.fetch_add(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::NullBackend;
    use crate::codec::{pack_samples, PcmEncoder};
    use bytes::BytesMut;

    fn payload(samples: &[i16]) -> Vec<u8> {
        let mut packed = BytesMut::new();
        pack_samples(samples, &mut packed);
        PcmEncoder::new(6).encode(&packed).unwrap().to_vec()
    }

    #[test]
    fn test_schedule_moves_samples_in_order() {
        let (input, buffer) = jitter_buffer(Duration::ZERO);
        let queue = PlaybackQueue::new(64);
        let released = AtomicU64::new(0);

        input.push(JitterEntry::new(vec![1, 2], Instant::now()));
        input.push(JitterEntry::new(vec![3], Instant::now()));
        drop(input);

        schedule(buffer, &queue, &released, || false);

        let drained: Vec<i16> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert_eq!(released.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_schedule_stops_when_queue_stays_full() {
        let (input, buffer) = jitter_buffer(Duration::ZERO);
        let queue = PlaybackQueue::new(1);
        let released = AtomicU64::new(0);
        let checks = std::cell::Cell::new(0);

        input.push(JitterEntry::new(vec![1, 2, 3], Instant::now()));

        schedule(buffer, &queue, &released, || {
            checks.set(checks.get() + 1);
            checks.get() > 3
        });
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_muted_stream_counts_payloads() {
        let mut stream = SpeakerStream::muted("carol");
        assert!(!stream.is_audible());
        assert_eq!(stream.push_payload(&payload(&[1, 2, 3])).unwrap(), 3);
        assert!(stream.push_payload(b"not zlib").is_err());

        let stats = stream.stats();
        assert_eq!(stats.payloads_received, 2);
        assert_eq!(stats.payloads_malformed, 1);
    }

    #[test]
    fn test_open_fails_without_device() {
        let result = SpeakerStream::open(
            "dave",
            &NullBackend,
            StreamFormat::mono(16_000),
            Duration::from_millis(50),
            1024,
        );
        assert!(matches!(result, Err(AudioError::Unavailable(_))));
    }
}
