//! Authoritative multiplayer flappy-bird room server
//!
//! Rooms run as independent tasks that own their simulation state, step it at a
//! fixed rate and broadcast full snapshots to their members. The `client`
//! module holds the prediction/reconciliation side of the protocol.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod lobby;
pub mod util;
pub mod ws;
