//! Room lifecycle: creation, membership and command routing

pub mod manager;
pub mod room_code;

pub use manager::{RoomInfo, RoomManager};
