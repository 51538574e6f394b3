//! Audio device access
//!
//! Hardware sits behind [`AudioBackend`] so the pipeline can run against
//! cpal, against nothing, or against a test double. A cpal stream has to
//! stay on the thread that built it, so every open device gets a dedicated
//! thread that owns the stream until the [`DeviceHandle`] is closed or the
//! stream reports an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::bounded;

use crate::error::AudioError;

/// Called from the capture callback with host-order mono samples
pub type InputCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// Called from the playback callback to fill a mono buffer
pub type OutputCallback = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sample layout requested from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

/// Source of capture and playback streams
pub trait AudioBackend: Send + Sync {
    /// Start capturing; `on_samples` runs on the platform's audio thread
    fn open_input(
        &self,
        format: StreamFormat,
        on_samples: InputCallback,
    ) -> Result<DeviceHandle, AudioError>;

    /// Start a playback stream; `fill` runs on the platform's audio thread
    fn open_output(
        &self,
        label: &str,
        format: StreamFormat,
        fill: OutputCallback,
    ) -> Result<DeviceHandle, AudioError>;
}

/// An open capture or playback device
pub struct DeviceHandle {
    label: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    /// Run `open` on a dedicated thread and keep whatever it returns alive
    /// there until the handle is closed or the running flag drops.
    ///
    /// Waits for `open` to finish so a failure is reported to the caller.
    pub fn spawn<F, S>(label: &str, open: F) -> Result<Self, AudioError>
    where
        F: FnOnce(Arc<AtomicBool>) -> Result<S, AudioError> + Send + 'static,
        S: 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let thread_running = running.clone();
        let thread = thread::Builder::new()
            .name(format!("device-{}", label))
            .spawn(move || {
                let stream = match open(thread_running.clone()) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        thread_running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(DEVICE_POLL_INTERVAL);
                }

                // Stream is dropped here, stopping the device
                drop(stream);
            })
            .map_err(AudioError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                label: label.to_string(),
                running,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamError(format!(
                    "{} device thread exited during setup",
                    label
                )))
            }
        }
    }

    /// A handle with no backing thread, for backends that drive callbacks
    /// themselves
    pub fn detached(label: &str) -> Self {
        Self {
            label: label.to_string(),
            running: Arc::new(AtomicBool::new(true)),
            thread: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// False once the device was closed or failed
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Shared flag that turns false when the device goes away
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Stop the device and join its thread. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            tracing::debug!("Audio device {} closed", self.label);
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Backend for machines without audio: every open fails, so capture is
/// skipped and remote speakers are muted
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn open_input(
        &self,
        _format: StreamFormat,
        _on_samples: InputCallback,
    ) -> Result<DeviceHandle, AudioError> {
        Err(AudioError::Unavailable("no audio backend".into()))
    }

    fn open_output(
        &self,
        _label: &str,
        _format: StreamFormat,
        _fill: OutputCallback,
    ) -> Result<DeviceHandle, AudioError> {
        Err(AudioError::Unavailable("no audio backend".into()))
    }
}

/// Backend the binary should use by default
pub fn default_backend(
    input_device: Option<String>,
    output_device: Option<String>,
) -> Arc<dyn AudioBackend> {
    #[cfg(feature = "device")]
    {
        Arc::new(cpal_backend::CpalBackend::new(input_device, output_device))
    }
    #[cfg(not(feature = "device"))]
    {
        let _ = (input_device, output_device);
        tracing::warn!("Built without the `device` feature, audio is disabled");
        Arc::new(NullBackend)
    }
}

/// Audio device description
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub channels: Vec<u16>,
    /// Supported (min, max) sample rate ranges
    pub sample_rates: Vec<(u32, u32)>,
}

/// List all available audio devices
pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, AudioError> {
    #[cfg(feature = "device")]
    {
        Ok(cpal_backend::list_devices())
    }
    #[cfg(not(feature = "device"))]
    {
        Err(AudioError::Unavailable(
            "built without the `device` feature".into(),
        ))
    }
}

/// Keep the first channel of interleaved `data`
#[cfg(feature = "device")]
pub(crate) fn first_channel<T: Copy>(data: &[T], channels: usize, out: &mut Vec<T>) {
    out.clear();
    out.extend(data.iter().step_by(channels.max(1)).copied());
}

/// Copy each mono sample into every channel of interleaved `out`
#[cfg(feature = "device")]
pub(crate) fn spread_channels<T: Copy>(mono: &[T], channels: usize, out: &mut [T]) {
    let channels = channels.max(1);
    for (frame, &sample) in out.chunks_mut(channels).zip(mono) {
        frame.fill(sample);
    }
}

#[cfg(feature = "device")]
pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(feature = "device")]
pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

#[cfg(feature = "device")]
mod cpal_backend {
    use super::*;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, StreamConfig};

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Direction {
        Input,
        Output,
    }

    /// cpal host backend
    pub struct CpalBackend {
        input_device: Option<String>,
        output_device: Option<String>,
    }

    impl CpalBackend {
        pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
            Self {
                input_device,
                output_device,
            }
        }
    }

    impl AudioBackend for CpalBackend {
        fn open_input(
            &self,
            format: StreamFormat,
            on_samples: InputCallback,
        ) -> Result<DeviceHandle, AudioError> {
            let name = self.input_device.clone();
            DeviceHandle::spawn("capture", move |running| {
                let device = find_device(Direction::Input, name.as_deref())?;
                let (config, sample_format) = pick_config(&device, Direction::Input, format)?;
                tracing::info!(
                    "Capturing from {} ({} ch, {:?})",
                    device.name().unwrap_or_else(|_| "Unknown".into()),
                    config.channels,
                    sample_format
                );
                let stream =
                    build_input(&device, &config, sample_format, on_samples, running)?;
                stream
                    .play()
                    .map_err(|e| AudioError::StreamError(e.to_string()))?;
                Ok(stream)
            })
        }

        fn open_output(
            &self,
            label: &str,
            format: StreamFormat,
            fill: OutputCallback,
        ) -> Result<DeviceHandle, AudioError> {
            let name = self.output_device.clone();
            DeviceHandle::spawn(&format!("playback-{}", label), move |running| {
                let device = find_device(Direction::Output, name.as_deref())?;
                let (config, sample_format) = pick_config(&device, Direction::Output, format)?;
                let stream = build_output(&device, &config, sample_format, fill, running)?;
                stream
                    .play()
                    .map_err(|e| AudioError::StreamError(e.to_string()))?;
                Ok(stream)
            })
        }
    }

    fn error_callback(running: Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) + Send + 'static {
        move |err| {
            // a failed device ends its stream; owners see the flag drop
            tracing::debug!("Audio stream error: {}", err);
            running.store(false, Ordering::SeqCst);
        }
    }

    fn build_input(
        device: &cpal::Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        mut on_samples: InputCallback,
        running: Arc<AtomicBool>,
    ) -> Result<cpal::Stream, AudioError> {
        let channels = config.channels as usize;
        let on_error = error_callback(running);

        let stream = match sample_format {
            SampleFormat::I16 => {
                let mut mono: Vec<i16> = Vec::new();
                device.build_input_stream(
                    config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if channels == 1 {
                            on_samples(data);
                        } else {
                            first_channel(data, channels, &mut mono);
                            on_samples(&mono);
                        }
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::F32 => {
                let mut mono: Vec<i16> = Vec::new();
                device.build_input_stream(
                    config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        mono.clear();
                        mono.extend(
                            data.iter()
                                .step_by(channels.max(1))
                                .map(|&sample| f32_to_i16(sample)),
                        );
                        on_samples(&mono);
                    },
                    on_error,
                    None,
                )
            }
            other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        };

        stream.map_err(|e| AudioError::StreamError(e.to_string()))
    }

    fn build_output(
        device: &cpal::Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        mut fill: OutputCallback,
        running: Arc<AtomicBool>,
    ) -> Result<cpal::Stream, AudioError> {
        let channels = config.channels as usize;
        let on_error = error_callback(running);

        let stream = match sample_format {
            SampleFormat::I16 => {
                let mut mono: Vec<i16> = Vec::new();
                device.build_output_stream(
                    config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        if channels == 1 {
                            fill(data);
                        } else {
                            mono.resize(data.len() / channels, 0);
                            fill(&mut mono);
                            spread_channels(&mono, channels, data);
                        }
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::F32 => {
                let mut mono: Vec<i16> = Vec::new();
                device.build_output_stream(
                    config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mono.resize(data.len() / channels.max(1), 0);
                        fill(&mut mono);
                        for (frame, &sample) in data.chunks_mut(channels.max(1)).zip(&mono) {
                            frame.fill(i16_to_f32(sample));
                        }
                    },
                    on_error,
                    None,
                )
            }
            other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        };

        stream.map_err(|e| AudioError::StreamError(e.to_string()))
    }

    fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();

        let Some(name) = name else {
            let device = match direction {
                Direction::Input => host.default_input_device(),
                Direction::Output => host.default_output_device(),
            };
            return device.ok_or_else(|| {
                AudioError::DeviceNotFound(match direction {
                    Direction::Input => "No default input device".into(),
                    Direction::Output => "No default output device".into(),
                })
            });
        };

        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        }
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }

        Err(AudioError::DeviceNotFound(name.to_string()))
    }

    /// Pick a configuration at the requested rate, preferring mono and i16
    fn pick_config(
        device: &cpal::Device,
        direction: Direction,
        format: StreamFormat,
    ) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
            Direction::Input => device.supported_input_configs().map(|c| c.collect()),
            Direction::Output => device.supported_output_configs().map(|c| c.collect()),
        }
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

        let rate = SampleRate(format.sample_rate);
        let best = ranges
            .into_iter()
            .filter(|range| {
                matches!(range.sample_format(), SampleFormat::I16 | SampleFormat::F32)
                    && range.min_sample_rate() <= rate
                    && rate <= range.max_sample_rate()
            })
            .min_by_key(|range| {
                (
                    range.channels() != format.channels,
                    range.sample_format() != SampleFormat::I16,
                    range.channels(),
                )
            })
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!(
                    "no i16/f32 configuration at {} Hz",
                    format.sample_rate
                ))
            })?;

        let sample_format = best.sample_format();
        let config = best.with_sample_rate(rate).config();
        Ok((config, sample_format))
    }

    /// List all available audio devices
    pub fn list_devices() -> Vec<AudioDeviceInfo> {
        let host = cpal::default_host();
        let mut devices: Vec<AudioDeviceInfo> = Vec::new();

        let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
        let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

        if let Ok(inputs) = host.input_devices() {
            for device in inputs {
                let Ok(name) = device.name() else { continue };
                let (channels, sample_rates) = capabilities(&device, Direction::Input);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    channels,
                    sample_rates,
                });
            }
        }

        if let Ok(outputs) = host.output_devices() {
            for device in outputs {
                let Ok(name) = device.name() else { continue };
                let is_default = default_output_name.as_ref() == Some(&name);

                // Check if we already have this device as input
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (channels, sample_rates) = capabilities(&device, Direction::Output);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    channels,
                    sample_rates,
                });
            }
        }

        devices
    }

    fn capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u16>, Vec<(u32, u32)>) {
        let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
            Direction::Input => device
                .supported_input_configs()
                .map(|c| c.collect())
                .unwrap_or_default(),
            Direction::Output => device
                .supported_output_configs()
                .map(|c| c.collect())
                .unwrap_or_default(),
        };

        let mut channels: Vec<u16> = ranges.iter().map(|r| r.channels()).collect();
        let mut rates: Vec<(u32, u32)> = ranges
            .iter()
            .map(|r| (r.min_sample_rate().0, r.max_sample_rate().0))
            .collect();
        channels.sort_unstable();
        channels.dedup();
        rates.sort_unstable();
        rates.dedup();
        (channels, rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "device")]
    #[test]
    fn test_first_channel() {
        let mut out = Vec::new();
        first_channel(&[1, 10, 2, 20, 3, 30], 2, &mut out);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[cfg(feature = "device")]
    #[test]
    fn test_spread_channels() {
        let mut out = [0i16; 6];
        spread_channels(&[1, 2, 3], 2, &mut out);
        assert_eq!(out, [1, 1, 2, 2, 3, 3]);
    }

    #[cfg(feature = "device")]
    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert!((i16_to_f32(i16::MAX) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_spawned_handle_reports_open_failure() {
        let result = DeviceHandle::spawn("broken", |_running| -> Result<(), AudioError> {
            Err(AudioError::DeviceNotFound("nothing".into()))
        });
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_spawned_handle_close_joins() {
        let mut handle = DeviceHandle::spawn("ok", |_running| Ok(())).unwrap();
        assert!(handle.is_running());
        handle.close();
        assert!(!handle.is_running());
        handle.close();
    }

    #[test]
    fn test_null_backend_refuses() {
        let backend = NullBackend;
        assert!(backend
            .open_input(StreamFormat::mono(16_000), Box::new(|_| {}))
            .is_err());
        assert!(backend
            .open_output("alice", StreamFormat::mono(16_000), Box::new(|_| {}))
            .is_err());
    }
}
