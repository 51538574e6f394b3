//! Local user-facing collaborators: console text in and out, video display

pub mod console;
pub mod video;

pub use console::{spawn_line_reader, spawn_stdin_reader, InputEvent, MessageSink, StdoutDisplay};
pub use video::VideoSink;
