//! Room manager - creates rooms and routes participant commands to them

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{mpsc::error::TrySendError, oneshot};
use tracing::{debug, info, warn};

use crate::game::{GameRoom, JoinAccepted, RoomCommand, RoomError, RoomRegistry};
use crate::ws::protocol::{ParticipantId, RoomId};

use super::room_code::generate_room_code;

/// Public view of a room for lobby lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub player_count: usize,
    pub started: bool,
}

/// Room manager
pub struct RoomManager {
    registry: Arc<RoomRegistry>,
    /// Map of participant -> current room
    memberships: DashMap<ParticipantId, RoomId>,
    max_players_per_room: usize,
}

impl RoomManager {
    pub fn new(registry: Arc<RoomRegistry>, max_players_per_room: usize) -> Self {
        Self {
            registry,
            memberships: DashMap::new(),
            max_players_per_room,
        }
    }

    /// Allocate a fresh room id and spawn its task. Must run inside a tokio runtime.
    pub fn create_room(&self) -> RoomId {
        let mut rng = rand::thread_rng();
        loop {
            let room_id = generate_room_code(&mut rng);
            let seed: u64 = rng.gen();

            let mut task = None;
            let inserted = self.registry.insert_if_vacant(room_id.clone(), || {
                let (room, handle) = GameRoom::new(room_id.clone(), seed, self.max_players_per_room);
                task = Some(room);
                handle
            });

            if let (true, Some(room)) = (inserted, task) {
                tokio::spawn(room.run());
                info!(room_id = %room_id, "Room created");
                return room_id;
            }

            debug!(room_id = %room_id, "Room code collision, retrying");
        }
    }

    /// Join a room, leaving any other room first
    pub async fn join_room(
        &self,
        room_id: &RoomId,
        participant_id: ParticipantId,
        display_name: String,
    ) -> Result<JoinAccepted, RoomError> {
        let handle = self
            .registry
            .get(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

        let current = self.current_room(&participant_id);
        if current.as_ref().is_some_and(|r| r != room_id) {
            self.leave(participant_id).await;
        }

        let (reply, reply_rx) = oneshot::channel();
        let sent = handle
            .command_tx
            .send(RoomCommand::Join {
                participant_id,
                display_name,
                reply,
            })
            .await;

        // A closed queue or dropped reply means the room emptied concurrently
        let accepted = match sent {
            Ok(()) => reply_rx
                .await
                .map_err(|_| RoomError::RoomNotFound(room_id.clone()))??,
            Err(_) => return Err(RoomError::RoomNotFound(room_id.clone())),
        };

        self.memberships.insert(participant_id, room_id.clone());
        Ok(accepted)
    }

    /// Start a room; starting an already started room is a no-op
    pub async fn start_room(
        &self,
        room_id: &RoomId,
        requester: ParticipantId,
    ) -> Result<(), RoomError> {
        let handle = self
            .registry
            .get(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

        handle
            .command_tx
            .send(RoomCommand::Start { requester })
            .await
            .map_err(|_| RoomError::RoomNotFound(room_id.clone()))
    }

    /// Forward a flap to the participant's room. Never fails: stale or
    /// meaningless inputs are dropped.
    pub fn submit_input(&self, participant_id: ParticipantId, flap: bool) {
        if !flap {
            return;
        }

        let Some(handle) = self
            .current_room(&participant_id)
            .and_then(|room_id| self.registry.get(&room_id))
        else {
            debug!(participant_id = %participant_id, "Input from participant outside any room");
            return;
        };

        match handle.command_tx.try_send(RoomCommand::Input {
            participant_id,
            flap,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(room_id = %handle.id, participant_id = %participant_id, "Room queue full, dropping input");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(room_id = %handle.id, "Room closed, dropping input");
            }
        }
    }

    /// Reset the participant's room to spawn defaults (host only)
    pub async fn restart_room(&self, participant_id: ParticipantId) -> Result<(), RoomError> {
        let room_id = self
            .current_room(&participant_id)
            .ok_or(RoomError::NotInRoom)?;
        let handle = self
            .registry
            .get(&room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

        let (reply, reply_rx) = oneshot::channel();
        handle
            .command_tx
            .send(RoomCommand::Restart {
                requester: participant_id,
                reply,
            })
            .await
            .map_err(|_| RoomError::RoomNotFound(room_id.clone()))?;

        reply_rx
            .await
            .map_err(|_| RoomError::RoomNotFound(room_id.clone()))?
    }

    /// Remove the participant from its room, tearing the room down once empty.
    /// Returns the room that was left, if any.
    pub async fn leave(&self, participant_id: ParticipantId) -> Option<RoomId> {
        let (_, room_id) = self.memberships.remove(&participant_id)?;
        let handle = self.registry.get(&room_id)?;

        let (reply, reply_rx) = oneshot::channel();
        let remaining = match handle
            .command_tx
            .send(RoomCommand::Leave {
                participant_id,
                reply,
            })
            .await
        {
            Ok(()) => reply_rx.await.unwrap_or(0),
            Err(_) => 0,
        };

        if remaining == 0 {
            self.registry.remove(&room_id);
            info!(room_id = %room_id, "Room empty, removed");
        }

        Some(room_id)
    }

    /// Tear down a room that never got (or lost) its members.
    /// Returns true if the room is gone afterwards.
    pub async fn discard_if_empty(&self, room_id: &RoomId) -> bool {
        let Some(handle) = self.registry.get(room_id) else {
            return true;
        };

        let (reply, reply_rx) = oneshot::channel();
        let closed = match handle
            .command_tx
            .send(RoomCommand::CloseIfEmpty { reply })
            .await
        {
            // A dropped reply means the actor already stopped
            Ok(()) => reply_rx.await.unwrap_or(true),
            Err(_) => true,
        };

        if closed {
            self.registry.remove(room_id);
            info!(room_id = %room_id, "Memberless room discarded");
        }
        closed
    }

    pub fn current_room(&self, participant_id: &ParticipantId) -> Option<RoomId> {
        self.memberships.get(participant_id).map(|r| r.value().clone())
    }

    pub fn room_info(&self, room_id: &RoomId) -> Option<RoomInfo> {
        self.registry.get(room_id).map(|h| RoomInfo {
            room_id: h.id.clone(),
            player_count: h.player_count(),
            started: h.is_started(),
        })
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}
