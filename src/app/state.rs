//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::RoomRegistry;
use crate::lobby::RoomManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub rooms: Arc<RoomManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(RoomRegistry::new());
        let rooms = Arc::new(RoomManager::new(
            registry.clone(),
            config.max_players_per_room,
        ));

        Self {
            config,
            registry,
            rooms,
        }
    }
}
