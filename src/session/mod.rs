//! Session controller: the single event loop that routes frames between the
//! transport, the console, the audio pipeline and the video seam

pub mod controller;
pub mod stats;

pub use controller::{Flow, Session, VideoChannel};
pub use stats::SessionStats;
pub use crate::ui::InputEvent;
