//! Game simulation modules

pub mod collision;
pub mod difficulty;
pub mod lane;
pub mod physics;
pub mod room;
pub mod snapshot;
pub mod state;

pub use room::{GameRoom, JoinAccepted, RoomCommand, RoomError, RoomHandle, RoomRegistry};
pub use state::{PlayerState, RoomState};
