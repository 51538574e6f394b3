//! Frame codec
//!
//! Layout (no multi-byte integers outside the payload):
//!
//! ```text
//! offset  size  field
//! 0       5     room code (ASCII)
//! 5       1     username length L
//! 6       L     username (ASCII)
//! 6+L     1     media type (0 text, 1 audio, 2 video)
//! 7+L     ..    payload
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::ROOM_CODE_LEN;
use crate::error::FrameError;
use crate::protocol::identity::{RoomCode, Username};

/// Room code, length byte and media type byte
pub const FRAME_HEADER_LEN: usize = ROOM_CODE_LEN + 2;

/// What a frame's payload contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MediaType {
    Text = 0,
    Audio = 1,
    Video = 2,
}

impl TryFrom<u8> for MediaType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::Audio),
            2 => Ok(Self::Video),
            other => Err(FrameError::UnknownMediaType(other)),
        }
    }
}

/// One self-contained wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub room: RoomCode,
    pub username: Username,
    pub media_type: MediaType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(
        room: RoomCode,
        username: Username,
        media_type: MediaType,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            room,
            username,
            media_type,
            payload: payload.into(),
        }
    }

    /// Size of the encoded frame in bytes
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.username.len() + self.payload.len()
    }

    /// Serialize the frame. Infallible: the identity types guarantee the
    /// username fits its length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(self.room.as_bytes());
        buf.put_u8(self.username.len() as u8);
        buf.put_slice(self.username.as_bytes());
        buf.put_u8(self.media_type as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a received buffer. The payload shares `buf`'s storage.
    ///
    /// Never returns a partially populated frame: any truncation or bad
    /// field is reported as a [`FrameError`].
    pub fn decode(buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TooShort(buf.len()));
        }

        let room = ascii_field(&buf[..ROOM_CODE_LEN], "room code")?;
        let room = RoomCode::new(room)?;

        let name_len = buf[ROOM_CODE_LEN] as usize;
        let remaining = buf.len() - FRAME_HEADER_LEN;
        if name_len > remaining {
            return Err(FrameError::UsernameOverrun {
                declared: name_len,
                remaining,
            });
        }

        let name_start = ROOM_CODE_LEN + 1;
        let name_end = name_start + name_len;
        let username = Username::new(ascii_field(&buf[name_start..name_end], "username")?)?;

        let media_type = MediaType::try_from(buf[name_end])?;
        let payload = buf.slice(name_end + 1..);

        Ok(Self {
            room,
            username,
            media_type,
            payload,
        })
    }
}

fn ascii_field(bytes: &[u8], field: &'static str) -> Result<String, FrameError> {
    if !bytes.is_ascii() {
        return Err(FrameError::NonAscii(field));
    }
    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::NonAscii(field))
}
