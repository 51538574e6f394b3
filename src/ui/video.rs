//! Video display seam
//!
//! Frames are opaque encoded images. Capture and rendering live outside the
//! crate; the session only moves bytes between a frame queue and a sink.

/// Displays received video frames
pub trait VideoSink: Send {
    fn display_frame(&mut self, username: &str, frame: &[u8]);
}
