//! Wire protocol: the frame layout shared by every media type and the
//! validated identities (room code, username) it carries.

pub mod frame;
pub mod identity;

pub use frame::{Frame, MediaType, FRAME_HEADER_LEN};
pub use identity::{Identity, RoomCode, Username};
