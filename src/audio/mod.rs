//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod pipeline;
pub mod playback;

pub use buffer::{JitterBuffer, JitterEntry, PlaybackFeed, PlaybackQueue};
pub use capture::{AudioCapture, CaptureBatcher, CaptureStats};
pub use device::{
    default_backend, list_devices, AudioBackend, AudioDeviceInfo, DeviceHandle, NullBackend,
    StreamFormat,
};
pub use pipeline::AudioPipeline;
pub use playback::{SpeakerStats, SpeakerStream};
