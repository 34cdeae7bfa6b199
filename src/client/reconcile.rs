//! Client-side prediction and reconciliation against authoritative snapshots

use tracing::debug;

use crate::game::physics::{PhysicsSystem, FLAP_VELOCITY, SPAWN_X, SPAWN_Y};
use crate::ws::protocol::{ParticipantId, PlayerSnapshot, RoomSnapshot, ServerMsg};

/// Minimum spacing between local flaps
pub const FLAP_THROTTLE_MILLIS: u64 = 120;
/// Vertical divergence tolerated before snapping to the server
pub const CORRECTION_TOLERANCE: f32 = 24.0;

/// Locally predicted vertical state of our own bird
#[derive(Debug, Clone, Copy, PartialEq)]
struct LocalBird {
    y: f32,
    vel_y: f32,
}

/// Merges server snapshots with local prediction for one participant
#[derive(Debug)]
pub struct Reconciler {
    participant_id: ParticipantId,
    confirmed: Option<RoomSnapshot>,
    local: Option<LocalBird>,
    last_flap_at: Option<u64>,
}

impl Reconciler {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            confirmed: None,
            local: None,
            last_flap_at: None,
        }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Apply a local flap. Returns true when the caller should send the input.
    pub fn flap(&mut self, now_ms: u64) -> bool {
        if !self.is_alive() {
            return false;
        }
        if let Some(last) = self.last_flap_at {
            if now_ms.saturating_sub(last) < FLAP_THROTTLE_MILLIS {
                return false;
            }
        }

        self.last_flap_at = Some(now_ms);
        if let Some(local) = self.local.as_mut() {
            local.vel_y = FLAP_VELOCITY;
        }
        true
    }

    /// Integrate our own bird between snapshots
    pub fn predict(&mut self, dt: f32) {
        let started = self.confirmed.as_ref().is_some_and(|s| s.started);
        if !started {
            return;
        }
        if let Some(local) = self.local.as_mut() {
            let (y, vel_y) = PhysicsSystem::update_bird(local.y, local.vel_y, false, dt);
            local.y = y;
            local.vel_y = vel_y;
        }
    }

    /// Merge a server message into the local mirror
    pub fn apply(&mut self, msg: &ServerMsg) {
        match msg {
            ServerMsg::Init { state } | ServerMsg::Update { state } => self.merge(state),
            ServerMsg::RoomRestarted { .. } => {
                // The next snapshot reseeds prediction from spawn
                self.local = None;
                self.last_flap_at = None;
            }
            ServerMsg::PlayerEliminated {
                participant_id,
                score,
            } => {
                if let Some(player) = self
                    .confirmed
                    .as_mut()
                    .and_then(|s| s.players.iter_mut().find(|p| p.participant_id == *participant_id))
                {
                    player.alive = false;
                    player.score = *score;
                }
                if *participant_id == self.participant_id {
                    self.local = None;
                }
            }
            ServerMsg::PlayerJoined { player } => {
                // Lobby joins produce no update until the room starts
                if let Some(snapshot) = self.confirmed.as_mut() {
                    if snapshot.player(player.participant_id).is_none() {
                        snapshot.players.push(PlayerSnapshot {
                            participant_id: player.participant_id,
                            display_name: player.display_name.clone(),
                            x: SPAWN_X,
                            y: SPAWN_Y,
                            vel_y: 0.0,
                            score: 0,
                            alive: true,
                            invincible_until: 0,
                        });
                    }
                }
            }
            ServerMsg::PlayerLeft { participant_id } => {
                if let Some(snapshot) = self.confirmed.as_mut() {
                    snapshot.players.retain(|p| p.participant_id != *participant_id);
                    // Host passes to the earliest remaining member, same as the server
                    if snapshot.host_id == Some(*participant_id) {
                        snapshot.host_id = snapshot.players.first().map(|p| p.participant_id);
                    }
                }
            }
            _ => {}
        }
    }

    fn merge(&mut self, state: &RoomSnapshot) {
        let server = state
            .player(self.participant_id)
            .filter(|p| p.alive)
            .map(|p| LocalBird {
                y: p.y,
                vel_y: p.vel_y,
            });

        self.local = match (self.local, server) {
            (_, None) => None,
            (None, Some(server)) => Some(server),
            (Some(local), Some(server)) => {
                let error = (local.y - server.y).abs();
                if error > CORRECTION_TOLERANCE {
                    debug!(error, tick = state.tick, "Prediction diverged, snapping to server");
                    Some(server)
                } else {
                    Some(local)
                }
            }
        };

        self.confirmed = Some(state.clone());
    }

    /// Whether the server last reported our bird alive
    pub fn is_alive(&self) -> bool {
        self.confirmed
            .as_ref()
            .and_then(|s| s.player(self.participant_id))
            .is_some_and(|p| p.alive)
    }

    /// Latest authoritative state: last snapshot plus later room events
    pub fn confirmed(&self) -> Option<&RoomSnapshot> {
        self.confirmed.as_ref()
    }

    /// Snapshot to render: server data with our own vertical state predicted
    pub fn display(&self) -> Option<RoomSnapshot> {
        let mut snapshot = self.confirmed.clone()?;
        if let Some(local) = self.local {
            if let Some(me) = snapshot
                .players
                .iter_mut()
                .find(|p| p.participant_id == self.participant_id)
            {
                me.y = local.y;
                me.vel_y = local.vel_y;
            }
        }
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{PlayerInfo, RoomId};
    use uuid::Uuid;

    fn snapshot(me: ParticipantId, tick: u64, y: f32, alive: bool, score: u32) -> RoomSnapshot {
        RoomSnapshot {
            room_id: RoomId::parse("RECON").unwrap(),
            tick,
            started: true,
            host_id: Some(me),
            players: vec![PlayerSnapshot {
                participant_id: me,
                display_name: "me".into(),
                x: SPAWN_X,
                y,
                vel_y: 0.0,
                score,
                alive,
                invincible_until: 0,
            }],
            pipes: Vec::new(),
        }
    }

    fn displayed_y(r: &Reconciler) -> f32 {
        let me = r.participant_id();
        r.display().unwrap().player(me).unwrap().y
    }

    #[test]
    fn flap_is_throttled() {
        let me = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        assert!(!r.flap(0), "no flap before joining");

        r.apply(&ServerMsg::Init {
            state: snapshot(me, 1, SPAWN_Y, true, 0),
        });
        assert!(r.flap(1_000));
        assert!(!r.flap(1_119));
        assert!(r.flap(1_120));
    }

    #[test]
    fn flap_moves_local_bird_immediately() {
        let me = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        r.apply(&ServerMsg::Init {
            state: snapshot(me, 1, SPAWN_Y, true, 0),
        });

        assert!(r.flap(0));
        assert_eq!(r.display().unwrap().player(me).unwrap().vel_y, FLAP_VELOCITY);
        r.predict(0.05);
        assert!(displayed_y(&r) < SPAWN_Y);
        // The confirmed snapshot is untouched
        assert_eq!(r.confirmed().unwrap().player(me).unwrap().y, SPAWN_Y);
    }

    #[test]
    fn small_divergence_keeps_prediction() {
        let me = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        r.apply(&ServerMsg::Init {
            state: snapshot(me, 1, SPAWN_Y, true, 0),
        });
        r.flap(0);
        r.predict(0.05);
        let predicted = displayed_y(&r);

        r.apply(&ServerMsg::Update {
            state: snapshot(me, 2, predicted + 10.0, true, 0),
        });
        assert_eq!(displayed_y(&r), predicted);
    }

    #[test]
    fn large_divergence_snaps_to_server() {
        let me = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        r.apply(&ServerMsg::Init {
            state: snapshot(me, 1, SPAWN_Y, true, 0),
        });

        r.apply(&ServerMsg::Update {
            state: snapshot(me, 2, SPAWN_Y + CORRECTION_TOLERANCE + 1.0, true, 0),
        });
        assert_eq!(displayed_y(&r), SPAWN_Y + CORRECTION_TOLERANCE + 1.0);
    }

    #[test]
    fn server_alive_and_score_always_win() {
        let me = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        r.apply(&ServerMsg::Init {
            state: snapshot(me, 1, SPAWN_Y, true, 0),
        });
        r.flap(0);

        r.apply(&ServerMsg::Update {
            state: snapshot(me, 2, SPAWN_Y, true, 3),
        });
        assert_eq!(r.display().unwrap().player(me).unwrap().score, 3);

        r.apply(&ServerMsg::Update {
            state: snapshot(me, 3, 590.0, false, 3),
        });
        let shown = r.display().unwrap();
        let me_shown = shown.player(me).unwrap();
        assert!(!me_shown.alive);
        assert_eq!(me_shown.y, 590.0);
        assert!(!r.flap(10_000));
    }

    #[test]
    fn elimination_notice_drops_prediction() {
        let me = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        r.apply(&ServerMsg::Init {
            state: snapshot(me, 1, SPAWN_Y, true, 0),
        });
        r.apply(&ServerMsg::PlayerEliminated {
            participant_id: me,
            score: 4,
        });

        assert!(!r.is_alive());
        assert_eq!(r.display().unwrap().player(me).unwrap().score, 4);
    }

    #[test]
    fn restart_reseeds_from_next_snapshot() {
        let me = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        r.apply(&ServerMsg::Init {
            state: snapshot(me, 1, 200.0, true, 0),
        });
        r.flap(0);
        r.apply(&ServerMsg::RoomRestarted { tick: 1 });

        // Within tolerance, yet the restart forces the server value
        r.apply(&ServerMsg::Update {
            state: snapshot(me, 2, 210.0, true, 0),
        });
        assert_eq!(displayed_y(&r), 210.0);
        assert!(r.flap(1));
    }

    #[test]
    fn lobby_joins_and_host_handoff_are_mirrored() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut r = Reconciler::new(me);
        let mut lobby = snapshot(me, 0, SPAWN_Y, true, 0);
        lobby.started = false;
        r.apply(&ServerMsg::Init { state: lobby });

        let joined = ServerMsg::PlayerJoined {
            player: PlayerInfo {
                participant_id: other,
                display_name: "other".into(),
            },
        };
        r.apply(&joined);
        r.apply(&joined);

        let shown = r.display().unwrap();
        assert_eq!(shown.players.len(), 2);
        let p = shown.player(other).unwrap();
        assert_eq!((p.x, p.y, p.score, p.alive), (SPAWN_X, SPAWN_Y, 0, true));
        assert_eq!(p.display_name, "other");

        r.apply(&ServerMsg::PlayerLeft { participant_id: me });
        assert_eq!(r.confirmed().unwrap().host_id, Some(other));
    }
}
