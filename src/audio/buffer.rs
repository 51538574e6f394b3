//! Playback buffering
//!
//! Received audio passes through two stages per speaker:
//!
//! 1. [`JitterBuffer`]: FIFO of decoded blocks tagged with their arrival
//!    time. A block is released no earlier than `arrival + delay`; blocks
//!    that are already older than the delay go through immediately.
//! 2. [`PlaybackQueue`]: lock-free sample queue drained by the device
//!    callback through a [`PlaybackFeed`], which repeats the last sample
//!    when the queue runs dry.

use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Decoded samples tagged with their local arrival time
#[derive(Debug, Clone)]
pub struct JitterEntry {
    pub samples: Vec<i16>,
    pub arrived_at: Instant,
}

impl JitterEntry {
    pub fn new(samples: Vec<i16>, arrived_at: Instant) -> Self {
        Self {
            samples,
            arrived_at,
        }
    }

    /// How much longer this entry must wait at `now` to have aged `delay`
    pub fn hold_time(&self, now: Instant, delay: Duration) -> Duration {
        delay.saturating_sub(now.saturating_duration_since(self.arrived_at))
    }
}

/// Producer side of a jitter buffer
#[derive(Clone)]
pub struct JitterInput {
    tx: Sender<JitterEntry>,
}

impl JitterInput {
    /// Queue an entry. Returns false once the buffer side is gone.
    pub fn push(&self, entry: JitterEntry) -> bool {
        self.tx.send(entry).is_ok()
    }
}

/// Outcome of one [`JitterBuffer::next_release`] call
#[derive(Debug)]
pub enum Release {
    /// Entry whose delay has elapsed
    Ready(JitterEntry),
    /// Nothing arrived within the poll interval
    Idle,
    /// The producer side is gone and the buffer is empty
    Closed,
}

/// Arrival-time delay buffer for one speaker
pub struct JitterBuffer {
    rx: Receiver<JitterEntry>,
    delay: Duration,
    /// Entries released
    released: u64,
    /// Entries that were already older than the delay when dequeued
    late: u64,
}

/// Create a connected jitter buffer pair
pub fn jitter_buffer(delay: Duration) -> (JitterInput, JitterBuffer) {
    let (tx, rx) = unbounded();
    (
        JitterInput { tx },
        JitterBuffer {
            rx,
            delay,
            released: 0,
            late: 0,
        },
    )
}

impl JitterBuffer {
    /// Take the oldest entry, waiting up to `poll` for one, and hold it until
    /// it has aged the playback delay.
    ///
    /// The hold is a plain sleep bounded by the delay itself.
    pub fn next_release(&mut self, poll: Duration) -> Release {
        let entry = match self.rx.recv_timeout(poll) {
            Ok(entry) => entry,
            Err(RecvTimeoutError::Timeout) => return Release::Idle,
            Err(RecvTimeoutError::Disconnected) => return Release::Closed,
        };

        let hold = entry.hold_time(Instant::now(), self.delay);
        if hold.is_zero() {
            self.late += 1;
        } else {
            thread::sleep(hold);
        }
        self.released += 1;
        Release::Ready(entry)
    }

    /// Entries waiting to be released
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Get statistics
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.len(),
            released: self.released,
            late: self.late,
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default)]
pub struct JitterBufferStats {
    pub level: usize,
    pub released: u64,
    pub late: u64,
}

/// Lock-free queue of samples ready for the device
pub struct PlaybackQueue {
    queue: ArrayQueue<i16>,
    underrun_count: AtomicU64,
}

impl PlaybackQueue {
    /// Create a new queue holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            underrun_count: AtomicU64::new(0),
        }
    }

    /// Push a sample, handing it back if the queue is full
    pub fn push(&self, sample: i16) -> Result<(), i16> {
        self.queue.push(sample)
    }

    pub fn pop(&self) -> Option<i16> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Device callbacks that found fewer samples than requested
    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a playback queue
pub type SharedPlaybackQueue = Arc<PlaybackQueue>;

/// Device-callback side of a playback queue
///
/// Holds the last sample it emitted so an underrun repeats that value
/// instead of dropping to silence.
pub struct PlaybackFeed {
    queue: SharedPlaybackQueue,
    last_sample: i16,
}

impl PlaybackFeed {
    pub fn new(queue: SharedPlaybackQueue) -> Self {
        Self {
            queue,
            last_sample: 0,
        }
    }

    /// Fill `out` from the queue, padding any shortfall with the last
    /// emitted sample. Returns how many slots got fresh samples.
    ///
    /// Runs on the audio thread: no locks, no allocation.
    pub fn fill(&mut self, out: &mut [i16]) -> usize {
        let mut fresh = 0;
        for slot in out.iter_mut() {
            if let Some(sample) = self.queue.pop() {
                self.last_sample = sample;
                fresh += 1;
            }
            *slot = self.last_sample;
        }
        if fresh < out.len() {
            self.queue.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    pub fn last_sample(&self) -> i16 {
        self.last_sample
    }
}
