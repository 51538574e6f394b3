//! Microphone capture and batching
//!
//! The device callback never blocks and never builds a buffer of its own: it
//! pushes each sample onto an unbounded lock-free queue and returns. A drain
//! thread packs the samples big-endian, cuts them into fixed-size batches and
//! compresses each batch into one payload.

use bytes::{Bytes, BytesMut};
use crossbeam::queue::SegQueue;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{AudioBackend, DeviceHandle, StreamFormat};
use crate::codec::{pack_samples, EncoderStats, PcmEncoder};
use crate::error::{AudioError, CodecError};

/// Accumulates packed samples and emits one compressed payload per
/// `batch_bytes` of PCM
pub struct CaptureBatcher {
    pending: BytesMut,
    batch_bytes: usize,
    encoder: PcmEncoder,
}

impl CaptureBatcher {
    pub fn new(batch_bytes: usize, compression_level: u32) -> Self {
        Self {
            pending: BytesMut::with_capacity(batch_bytes * 2),
            batch_bytes: batch_bytes.max(2),
            encoder: PcmEncoder::new(compression_level),
        }
    }

    /// Append `samples` and return every batch they completed, oldest first
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<Bytes>, CodecError> {
        pack_samples(samples, &mut self.pending);

        let mut batches = Vec::new();
        while self.pending.len() >= self.batch_bytes {
            let batch = self.pending.split_to(self.batch_bytes);
            batches.push(self.encoder.encode(&batch)?);
        }
        Ok(batches)
    }

    /// Packed bytes waiting for the next batch
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn encoder_stats(&self) -> EncoderStats {
        self.encoder.stats()
    }
}

#[derive(Default)]
struct CaptureCounters {
    samples_captured: AtomicU64,
    batches_sent: AtomicU64,
    encode_errors: AtomicU64,
}

/// Drain thread sleep while the queue is empty
const DRAIN_IDLE_INTERVAL: Duration = Duration::from_millis(5);

/// Running capture: the input device plus its drain thread
pub struct AudioCapture {
    /// Input device; dropping it stops the callback
    device: Option<DeviceHandle>,

    /// Drain thread handle
    drain: Option<JoinHandle<()>>,

    /// Set to stop the drain thread
    shutdown: Arc<AtomicBool>,

    counters: Arc<CaptureCounters>,
}

impl AudioCapture {
    /// Open the input device and start batching into `batches`
    pub fn start(
        backend: &dyn AudioBackend,
        format: StreamFormat,
        batch_bytes: usize,
        compression_level: u32,
        batches: Sender<Bytes>,
    ) -> Result<Self, AudioError> {
        let queue = Arc::new(SegQueue::<i16>::new());
        let counters = Arc::new(CaptureCounters::default());

        let callback_queue = queue.clone();
        let callback_counters = counters.clone();
        let device = backend.open_input(
            format,
            Box::new(move |samples: &[i16]| {
                callback_counters
                    .samples_captured
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                for &sample in samples {
                    callback_queue.push(sample);
                }
            }),
        )?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let drain_shutdown = shutdown.clone();
        let drain_counters = counters.clone();
        let drain = thread::Builder::new()
            .name("capture-drain".into())
            .spawn(move || {
                let mut batcher = CaptureBatcher::new(batch_bytes, compression_level);
                let mut block: Vec<i16> = Vec::with_capacity(batch_bytes);

                'drain: while !drain_shutdown.load(Ordering::Relaxed) {
                    block.clear();
                    while block.len() < batch_bytes {
                        match queue.pop() {
                            Some(sample) => block.push(sample),
                            None => break,
                        }
                    }
                    if block.is_empty() {
                        thread::sleep(DRAIN_IDLE_INTERVAL);
                        continue;
                    }

                    let ready = match batcher.push(&block) {
                        Ok(ready) => ready,
                        Err(e) => {
                            drain_counters.encode_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("Dropping capture batch: {}", e);
                            continue;
                        }
                    };

                    for batch in ready {
                        if batches.send(batch).is_err() {
                            break 'drain;
                        }
                        drain_counters.batches_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }

                let stats = batcher.encoder_stats();
                tracing::debug!(
                    "Capture drain stopped after {} batches (ratio {:.2})",
                    stats.batches_encoded,
                    stats.ratio()
                );
            })
            .map_err(AudioError::Spawn)?;

        tracing::info!(
            "Audio capture started ({} Hz, {} byte batches)",
            format.sample_rate,
            batch_bytes
        );

        Ok(Self {
            device: Some(device),
            drain: Some(drain),
            shutdown,
            counters,
        })
    }

    /// Whether the input device is still delivering
    pub fn is_running(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_running())
    }

    /// Get statistics
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            samples_captured: self.counters.samples_captured.load(Ordering::Relaxed),
            batches_sent: self.counters.batches_sent.load(Ordering::Relaxed),
            encode_errors: self.counters.encode_errors.load(Ordering::Relaxed),
        }
    }

    /// Close the device and join the drain thread. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
            tracing::info!("Audio capture stopped");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture statistics
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub samples_captured: u64,
    pub batches_sent: u64,
    pub encode_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmDecoder;

    #[test]
    fn test_batcher_waits_for_full_batch() {
        let mut batcher = CaptureBatcher::new(2048, 6);
        assert!(batcher.push(&[1i16; 1023]).unwrap().is_empty());
        assert_eq!(batcher.pending_bytes(), 2046);

        let batches = batcher.push(&[2i16; 1]).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batcher.pending_bytes(), 0);
    }

    #[test]
    fn test_batcher_splits_large_block() {
        let mut batcher = CaptureBatcher::new(2048, 6);
        let samples: Vec<i16> = (0..2500).map(|i| i as i16).collect();

        let batches = batcher.push(&samples).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batcher.pending_bytes(), (2500 - 2048) * 2);

        // batches decode back to the captured samples, in order
        let mut decoder = PcmDecoder::new();
        let mut decoded = decoder.decode(&batches[0]).unwrap();
        decoded.extend(decoder.decode(&batches[1]).unwrap());
        assert_eq!(decoded, samples[..2048]);
    }

    #[test]
    fn test_capture_forwards_batches() {
        use crate::audio::device::{InputCallback, OutputCallback};
        use crossbeam_channel::bounded;
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Mic {
            callback: Mutex<Option<InputCallback>>,
        }

        impl AudioBackend for Mic {
            fn open_input(
                &self,
                _format: StreamFormat,
                on_samples: InputCallback,
            ) -> Result<DeviceHandle, AudioError> {
                *self.callback.lock() = Some(on_samples);
                Ok(DeviceHandle::detached("mic"))
            }

            fn open_output(
                &self,
                _label: &str,
                _format: StreamFormat,
                _fill: OutputCallback,
            ) -> Result<DeviceHandle, AudioError> {
                Err(AudioError::Unavailable("input only".into()))
            }
        }

        let mic = Mic::default();
        let (tx, rx) = bounded(16);
        let mut capture = AudioCapture::start(&mic, StreamFormat::mono(16_000), 2048, 6, tx).unwrap();

        {
            let mut guard = mic.callback.lock();
            let callback = guard.as_mut().unwrap();
            let first: Vec<i16> = (0..512).collect();
            let second: Vec<i16> = (512..1024).collect();
            callback(&first);
            callback(&second);
        }

        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let expected: Vec<i16> = (0..1024).collect();
        assert_eq!(PcmDecoder::new().decode(&batch).unwrap(), expected);

        capture.stop();
        assert_eq!(capture.stats().samples_captured, 1024);
        assert_eq!(capture.stats().batches_sent, 1);
    }
}
