//! Room codes and usernames
//!
//! Both are ASCII on the wire. The types here are the only way to build a
//! [`Frame`](super::Frame), so anything that reaches the encoder is already
//! known to fit the layout.

use std::fmt;

use crate::constants::ROOM_CODE_LEN;
use crate::error::FrameError;

/// Five ASCII characters scoping which broadcasts a peer accepts.
///
/// Used both as the transport subscription topic and as the first field of
/// every frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn new(code: impl Into<String>) -> Result<Self, FrameError> {
        let code = code.into();
        if code.len() != ROOM_CODE_LEN || !code.is_ascii() {
            return Err(FrameError::InvalidRoomCode(code));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sender identity, ASCII, at most 255 bytes (one-byte length prefix).
///
/// An empty username is representable because the wire format allows it;
/// rejecting empty names for the local user is left to configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    /// Longest username the length prefix can express
    pub const MAX_LEN: usize = u8::MAX as usize;

    pub fn new(name: impl Into<String>) -> Result<Self, FrameError> {
        let name = name.into();
        if name.len() > Self::MAX_LEN || !name.is_ascii() {
            return Err(FrameError::InvalidUsername(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who the local participant is and which room it talks in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: Username,
    pub room: RoomCode,
}

impl Identity {
    pub fn new(username: Username, room: RoomCode) -> Self {
        Self { username, room }
    }
}
