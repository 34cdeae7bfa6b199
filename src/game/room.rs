//! Room task: single owner of a room's state and its tick loop

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::util::time::{tick_delta, tick_duration, unix_millis};
use crate::ws::protocol::{ParticipantId, PlayerInfo, RoomId, RoomSnapshot, ServerMsg};

use super::snapshot::SnapshotBuilder;
use super::state::RoomState;

/// Capacity of a room's command queue
const COMMAND_QUEUE_CAPACITY: usize = 256;
/// Capacity of a room's event fan-out
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Room-level errors reported to callers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room {0} not found")]
    RoomNotFound(RoomId),

    #[error("Room {0} is full")]
    RoomFull(RoomId),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Only the host can do that")]
    NotHost,
}

/// A successful join: the catch-up snapshot plus the live event stream,
/// subscribed atomically so no tick falls between them
#[derive(Debug)]
pub struct JoinAccepted {
    pub snapshot: RoomSnapshot,
    pub events: broadcast::Receiver<ServerMsg>,
}

/// Commands accepted by a room task
#[derive(Debug)]
pub enum RoomCommand {
    /// Insert a player at spawn; fails if the room is full
    Join {
        participant_id: ParticipantId,
        display_name: String,
        reply: oneshot::Sender<Result<JoinAccepted, RoomError>>,
    },
    /// Leave the lobby phase; repeated starts are no-ops
    Start { requester: ParticipantId },
    /// Queue a flap for a living member; anything else is dropped
    Input {
        participant_id: ParticipantId,
        flap: bool,
    },
    /// Reset players and obstacles; host only
    Restart {
        requester: ParticipantId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Remove a member; replies with the remaining member count
    Leave {
        participant_id: ParticipantId,
        reply: oneshot::Sender<usize>,
    },
    /// Shut the room down if nobody is in it; replies whether it closed
    CloseIfEmpty { reply: oneshot::Sender<bool> },
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: RoomId,
    pub command_tx: mpsc::Sender<RoomCommand>,
    pub events_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
    pub started: Arc<AtomicBool>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn get(&self, id: &RoomId) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    /// Insert the handle built by `make` only if `id` is free
    pub fn insert_if_vacant<F>(&self, id: RoomId, make: F) -> bool
    where
        F: FnOnce() -> RoomHandle,
    {
        match self.rooms.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(make());
                true
            }
        }
    }

    pub fn remove(&self, id: &RoomId) -> Option<RoomHandle> {
        self.rooms.remove(id).map(|(_, h)| h)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the room task keeps running after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// The authoritative room
pub struct GameRoom {
    state: RoomState,
    max_players: usize,
    command_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<ServerMsg>,
    player_count: Arc<AtomicUsize>,
    started: Arc<AtomicBool>,
}

impl GameRoom {
    /// Create a new room
    pub fn new(id: RoomId, seed: u64, max_players: usize) -> (Self, RoomHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let player_count = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicBool::new(false));

        let handle = RoomHandle {
            id: id.clone(),
            command_tx,
            events_tx: events_tx.clone(),
            player_count: player_count.clone(),
            started: started.clone(),
        };

        let room = Self {
            state: RoomState::new(id, seed),
            max_players,
            command_rx,
            events_tx,
            player_count,
            started,
        };

        (room, handle)
    }

    /// Run the authoritative tick loop until the room empties or every handle is dropped
    pub async fn run(mut self) {
        info!(room_id = %self.state.id, "Room opened");

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if self.handle_command(command) == Flow::Close {
                        break;
                    }
                }
                _ = tick_interval.tick() => {
                    self.run_tick(unix_millis());
                }
            }
        }

        info!(room_id = %self.state.id, tick = self.state.tick, "Room closed");
    }

    fn handle_command(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join {
                participant_id,
                display_name,
                reply,
            } => self.handle_join(participant_id, display_name, reply),
            RoomCommand::Start { requester } => {
                self.handle_start(requester);
                Flow::Continue
            }
            RoomCommand::Input {
                participant_id,
                flap,
            } => {
                if !flap || !self.state.queue_flap(&participant_id) {
                    debug!(
                        room_id = %self.state.id,
                        participant_id = %participant_id,
                        "Dropped input"
                    );
                }
                Flow::Continue
            }
            RoomCommand::Restart { requester, reply } => {
                let _ = reply.send(self.handle_restart(requester));
                Flow::Continue
            }
            RoomCommand::Leave {
                participant_id,
                reply,
            } => {
                self.handle_leave(participant_id);
                let remaining = self.state.players.len();
                let _ = reply.send(remaining);
                if remaining == 0 {
                    Flow::Close
                } else {
                    Flow::Continue
                }
            }
            RoomCommand::CloseIfEmpty { reply } => {
                let empty = self.state.players.is_empty();
                let _ = reply.send(empty);
                if empty {
                    Flow::Close
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Handle player join request
    fn handle_join(
        &mut self,
        participant_id: ParticipantId,
        display_name: String,
        reply: oneshot::Sender<Result<JoinAccepted, RoomError>>,
    ) -> Flow {
        let already_member = self.state.players.contains_key(&participant_id);

        if !already_member && self.state.players.len() >= self.max_players {
            let _ = reply.send(Err(RoomError::RoomFull(self.state.id.clone())));
            return Flow::Continue;
        }

        if !already_member {
            let player = self
                .state
                .add_player(participant_id, display_name, unix_millis());
            let info = PlayerInfo {
                participant_id,
                display_name: player.display_name.clone(),
            };
            self.sync_player_count();

            // Existing members only; the joiner subscribes below
            let _ = self.events_tx.send(ServerMsg::PlayerJoined { player: info });

            info!(
                room_id = %self.state.id,
                participant_id = %participant_id,
                player_count = self.state.players.len(),
                "Player joined room"
            );
        }

        let accepted = JoinAccepted {
            snapshot: SnapshotBuilder::build(&self.state),
            events: self.events_tx.subscribe(),
        };

        if reply.send(Ok(accepted)).is_err() && !already_member {
            warn!(
                room_id = %self.state.id,
                participant_id = %participant_id,
                "Joiner went away before confirmation, removing"
            );
            self.handle_leave(participant_id);
            if self.state.players.is_empty() {
                return Flow::Close;
            }
        }

        Flow::Continue
    }

    fn handle_start(&mut self, requester: ParticipantId) {
        if self.state.start(unix_millis()) {
            self.started.store(true, Ordering::Relaxed);
            let _ = self.events_tx.send(ServerMsg::GameStarted {
                tick: self.state.tick,
            });
            info!(room_id = %self.state.id, requester = %requester, "Room started");
        } else {
            debug!(room_id = %self.state.id, requester = %requester, "Room already started");
        }
    }

    fn handle_restart(&mut self, requester: ParticipantId) -> Result<(), RoomError> {
        if self.state.host_id != Some(requester) {
            return Err(RoomError::NotHost);
        }

        self.state.restart(unix_millis());
        let _ = self.events_tx.send(ServerMsg::RoomRestarted {
            tick: self.state.tick,
        });
        info!(room_id = %self.state.id, requester = %requester, "Room restarted");
        Ok(())
    }

    /// Handle player leave
    fn handle_leave(&mut self, participant_id: ParticipantId) {
        let Some(player) = self.state.remove_player(&participant_id) else {
            return;
        };
        self.sync_player_count();

        let _ = self
            .events_tx
            .send(ServerMsg::PlayerLeft { participant_id });

        info!(
            room_id = %self.state.id,
            participant_id = %participant_id,
            player_count = self.state.players.len(),
            "Player left room"
        );

        // The last survivor leaving ends the round for those still watching
        if player.alive
            && self.state.started
            && !self.state.players.is_empty()
            && self.state.alive_count() == 0
        {
            let _ = self.events_tx.send(ServerMsg::GameOver {
                results: self.state.results(),
            });
        }
    }

    /// Run a single simulation tick and broadcast its outcome
    fn run_tick(&mut self, now_ms: u64) {
        if !self.state.started {
            return;
        }

        let report = self.state.step(tick_delta(), now_ms);

        let _ = self.events_tx.send(ServerMsg::Update {
            state: SnapshotBuilder::build(&self.state),
        });

        for (participant_id, score) in report.eliminated {
            info!(
                room_id = %self.state.id,
                participant_id = %participant_id,
                score,
                "Player eliminated"
            );
            let _ = self.events_tx.send(ServerMsg::PlayerEliminated {
                participant_id,
                score,
            });
        }

        if report.game_over {
            info!(room_id = %self.state.id, tick = self.state.tick, "All players eliminated");
            let _ = self.events_tx.send(ServerMsg::GameOver {
                results: self.state.results(),
            });
        }
    }

    fn sync_player_count(&self) {
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn room_id() -> RoomId {
        RoomId::parse("ROOM1").unwrap()
    }

    async fn join(
        handle: &RoomHandle,
        participant_id: ParticipantId,
    ) -> Result<JoinAccepted, RoomError> {
        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(RoomCommand::Join {
                participant_id,
                display_name: "bird".into(),
                reply,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn leave(handle: &RoomHandle, participant_id: ParticipantId) -> usize {
        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(RoomCommand::Leave {
                participant_id,
                reply,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn join_returns_catch_up_snapshot() {
        let (room, handle) = GameRoom::new(room_id(), 1, 4);
        tokio::spawn(room.run());

        let a = Uuid::new_v4();
        let accepted = join(&handle, a).await.unwrap();
        assert_eq!(accepted.snapshot.players.len(), 1);
        assert_eq!(accepted.snapshot.host_id, Some(a));
        assert!(!accepted.snapshot.started);
        assert_eq!(handle.player_count(), 1);
    }

    #[tokio::test]
    async fn existing_members_see_joins_but_joiner_does_not() {
        let (room, handle) = GameRoom::new(room_id(), 1, 4);
        tokio::spawn(room.run());

        let mut first = join(&handle, Uuid::new_v4()).await.unwrap().events;
        let b = Uuid::new_v4();
        let mut second = join(&handle, b).await.unwrap().events;

        match first.recv().await.unwrap() {
            ServerMsg::PlayerJoined { player } => assert_eq!(player.participant_id, b),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(matches!(
            second.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn full_room_rejects_join() {
        let (room, handle) = GameRoom::new(room_id(), 1, 1);
        tokio::spawn(room.run());

        join(&handle, Uuid::new_v4()).await.unwrap();
        let err = join(&handle, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err, RoomError::RoomFull(room_id()));
    }

    #[tokio::test]
    async fn restart_requires_host() {
        let (room, handle) = GameRoom::new(room_id(), 1, 4);
        tokio::spawn(room.run());

        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        join(&handle, host).await.unwrap();
        join(&handle, guest).await.unwrap();

        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(RoomCommand::Restart {
                requester: guest,
                reply,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Err(RoomError::NotHost));

        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(RoomCommand::Restart {
                requester: host,
                reply,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn room_task_exits_when_last_member_leaves() {
        let (room, handle) = GameRoom::new(room_id(), 1, 4);
        let task = tokio::spawn(room.run());

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        join(&handle, a).await.unwrap();
        join(&handle, b).await.unwrap();

        assert_eq!(leave(&handle, a).await, 1);
        assert!(!task.is_finished());
        assert_eq!(leave(&handle, b).await, 0);

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("room task should stop")
            .unwrap();
        assert!(handle.command_tx.is_closed());
    }

    #[tokio::test]
    async fn close_if_empty_only_closes_memberless_rooms() {
        let (room, handle) = GameRoom::new(room_id(), 1, 4);
        let task = tokio::spawn(room.run());

        let a = Uuid::new_v4();
        join(&handle, a).await.unwrap();
        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(RoomCommand::CloseIfEmpty { reply })
            .await
            .unwrap();
        assert!(!rx.await.unwrap());
        assert!(!task.is_finished());

        // Leaving already closes the room, so use a fresh one for the empty case
        let (room, handle) = GameRoom::new(room_id(), 2, 4);
        let task = tokio::spawn(room.run());
        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(RoomCommand::CloseIfEmpty { reply })
            .await
            .unwrap();
        assert!(rx.await.unwrap());
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("room task should stop")
            .unwrap();
    }

    fn started_room_with(players: &[ParticipantId]) -> (GameRoom, RoomHandle) {
        let (mut room, handle) = GameRoom::new(room_id(), 1, 4);
        for id in players {
            room.state.add_player(*id, "bird".into(), 0);
        }
        room.state.start(0);
        (room, handle)
    }

    #[test]
    fn last_survivor_leaving_ends_the_round() {
        let dead = Uuid::new_v4();
        let survivor = Uuid::new_v4();
        let (mut room, handle) = started_room_with(&[dead, survivor]);
        room.state.players.get_mut(&dead).unwrap().alive = false;
        room.state.players.get_mut(&dead).unwrap().score = 5;
        let mut events = handle.events_tx.subscribe();

        room.handle_leave(survivor);

        match events.try_recv().unwrap() {
            ServerMsg::PlayerLeft { participant_id } => assert_eq!(participant_id, survivor),
            other => panic!("unexpected message: {:?}", other),
        }
        match events.try_recv().unwrap() {
            ServerMsg::GameOver { results } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].participant_id, dead);
                assert_eq!(results[0].score, 5);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn leaving_with_survivors_left_keeps_playing() {
        let dead = Uuid::new_v4();
        let leaver = Uuid::new_v4();
        let stayer = Uuid::new_v4();
        let (mut room, handle) = started_room_with(&[dead, leaver, stayer]);
        room.state.players.get_mut(&dead).unwrap().alive = false;
        let mut events = handle.events_tx.subscribe();

        room.handle_leave(leaver);

        assert!(matches!(
            events.try_recv().unwrap(),
            ServerMsg::PlayerLeft { .. }
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(room.state.alive_count(), 1);
    }

    #[tokio::test]
    async fn started_room_streams_updates_in_tick_order() {
        let (room, handle) = GameRoom::new(room_id(), 1, 4);
        tokio::spawn(room.run());

        let a = Uuid::new_v4();
        let mut events = join(&handle, a).await.unwrap().events;
        handle
            .command_tx
            .send(RoomCommand::Start { requester: a })
            .await
            .unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            ServerMsg::GameStarted { tick: 0 }
        ));

        let mut last_tick = 0;
        let mut updates = 0;
        while updates < 3 {
            if let ServerMsg::Update { state } = events.recv().await.unwrap() {
                assert!(state.tick > last_tick);
                assert!(state.started);
                last_tick = state.tick;
                updates += 1;
            }
        }
        assert!(handle.is_started());
    }
}
