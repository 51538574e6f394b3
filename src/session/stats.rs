//! Session counters

use std::fmt;

/// Frame counters for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames broadcast
    pub frames_sent: u64,
    /// Messages taken from peers, valid or not
    pub frames_received: u64,
    /// Undecodable frames and unusable payloads
    pub malformed: u64,
    /// Decoded frames carrying another room code
    pub foreign_room: u64,
    pub text_sent: u64,
    pub text_received: u64,
    pub audio_sent: u64,
    pub audio_received: u64,
    pub video_sent: u64,
    pub video_received: u64,
    /// Broadcasts the transport refused
    pub send_errors: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} (text {}, audio {}, video {}), received {} (text {}, audio {}, video {}), \
             malformed {}, foreign room {}, send errors {}",
            self.frames_sent,
            self.text_sent,
            self.audio_sent,
            self.video_sent,
            self.frames_received,
            self.text_received,
            self.audio_received,
            self.video_received,
            self.malformed,
            self.foreign_room,
            self.send_errors,
        )
    }
}
