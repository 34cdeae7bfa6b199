//! Authoritative room state and the fixed-rate integration step

use std::collections::HashMap;

use crate::ws::protocol::{ParticipantId, PlayerResult, RoomId};

use super::collision;
use super::lane::ObstacleLane;
use super::physics::{
    PhysicsSystem, BIRD_HALF_WIDTH, INVINCIBLE_MILLIS, SPAWN_X, SPAWN_Y, WORLD_HEIGHT,
};

/// Player state in a room (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub participant_id: ParticipantId,
    pub display_name: String,

    // Position and movement
    pub x: f32,
    pub y: f32,
    pub vel_y: f32,

    pub score: u32,
    pub alive: bool,
    /// Unix millis until which collisions are ignored
    pub invincible_until: u64,

    /// Set by input, consumed by the next tick
    pub pending_flap: bool,
    /// Monotonic join counter, used for stable ordering and host handoff
    pub join_order: u64,
}

impl PlayerState {
    pub fn new(
        participant_id: ParticipantId,
        display_name: String,
        join_order: u64,
        now_ms: u64,
    ) -> Self {
        let mut player = Self {
            participant_id,
            display_name,
            x: SPAWN_X,
            y: SPAWN_Y,
            vel_y: 0.0,
            score: 0,
            alive: true,
            invincible_until: 0,
            pending_flap: false,
            join_order,
        };
        player.respawn(now_ms);
        player
    }

    /// Back to spawn defaults with a fresh invincibility window
    pub fn respawn(&mut self, now_ms: u64) {
        self.x = SPAWN_X;
        self.y = SPAWN_Y;
        self.vel_y = 0.0;
        self.score = 0;
        self.alive = true;
        self.pending_flap = false;
        self.invincible_until = now_ms + INVINCIBLE_MILLIS;
    }

    pub fn is_invincible(&self, now_ms: u64) -> bool {
        now_ms <= self.invincible_until
    }
}

/// What happened during one tick, for out-of-band notifications
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// Players eliminated this tick with their final score, in join order
    pub eliminated: Vec<(ParticipantId, u32)>,
    /// The last living player died this tick
    pub game_over: bool,
}

/// Room state (owned by the room task)
pub struct RoomState {
    pub id: RoomId,
    pub tick: u64,
    pub started: bool,
    pub host_id: Option<ParticipantId>,
    pub players: HashMap<ParticipantId, PlayerState>,
    pub lane: ObstacleLane,
    next_join_order: u64,
}

impl RoomState {
    pub fn new(id: RoomId, seed: u64) -> Self {
        Self {
            id,
            tick: 0,
            started: false,
            host_id: None,
            players: HashMap::new(),
            lane: ObstacleLane::new(seed),
            next_join_order: 0,
        }
    }

    /// Insert a player at spawn. The first member becomes host.
    pub fn add_player(
        &mut self,
        participant_id: ParticipantId,
        display_name: String,
        now_ms: u64,
    ) -> &PlayerState {
        let join_order = self.next_join_order;
        self.next_join_order += 1;

        if self.host_id.is_none() {
            self.host_id = Some(participant_id);
        }

        self.players
            .entry(participant_id)
            .or_insert_with(|| PlayerState::new(participant_id, display_name, join_order, now_ms))
    }

    /// Remove a player, handing host to the earliest remaining member if needed
    pub fn remove_player(&mut self, participant_id: &ParticipantId) -> Option<PlayerState> {
        let removed = self.players.remove(participant_id)?;

        if self.host_id == Some(*participant_id) {
            self.host_id = self
                .players
                .values()
                .min_by_key(|p| p.join_order)
                .map(|p| p.participant_id);
        }

        Some(removed)
    }

    /// Flag a flap for the next tick. Extra flaps before that tick coalesce.
    /// Flaps in the lobby phase are dropped.
    pub fn queue_flap(&mut self, participant_id: &ParticipantId) -> bool {
        if !self.started {
            return false;
        }
        match self.players.get_mut(participant_id) {
            Some(player) if player.alive => {
                player.pending_flap = true;
                true
            }
            _ => false,
        }
    }

    /// Leave the lobby phase. Returns false if already started.
    pub fn start(&mut self, now_ms: u64) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        self.lane.arm(now_ms);
        for player in self.players.values_mut() {
            player.invincible_until = now_ms + INVINCIBLE_MILLIS;
            player.pending_flap = false;
        }
        true
    }

    /// Reset every player to spawn and clear the obstacle lane
    pub fn restart(&mut self, now_ms: u64) {
        for player in self.players.values_mut() {
            player.respawn(now_ms);
        }
        self.lane.arm(now_ms);
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    pub fn best_living_score(&self) -> u32 {
        self.players
            .values()
            .filter(|p| p.alive)
            .map(|p| p.score)
            .max()
            .unwrap_or(0)
    }

    /// Final scores, best first
    pub fn results(&self) -> Vec<PlayerResult> {
        let mut players: Vec<&PlayerState> = self.players.values().collect();
        players.sort_by(|a, b| b.score.cmp(&a.score).then(a.join_order.cmp(&b.join_order)));
        players
            .into_iter()
            .map(|p| PlayerResult {
                participant_id: p.participant_id,
                display_name: p.display_name.clone(),
                score: p.score,
            })
            .collect()
    }

    /// Run one fixed step of `dt` seconds. No-op while in the lobby phase.
    pub fn step(&mut self, dt: f32, now_ms: u64) -> TickReport {
        let mut report = TickReport::default();
        if !self.started {
            return report;
        }

        self.tick += 1;
        let alive_before = self.alive_count();
        let mut eliminated: Vec<(u64, ParticipantId, u32)> = Vec::new();

        for player in self.players.values_mut() {
            if !player.alive {
                continue;
            }

            let flap = std::mem::take(&mut player.pending_flap);
            let (y, vel_y) = PhysicsSystem::update_bird(player.y, player.vel_y, flap, dt);
            player.y = y;
            player.vel_y = vel_y;

            // Credit each fully cleared pipe once
            let left_edge = player.x - BIRD_HALF_WIDTH;
            for pipe in self.lane.pipes_mut() {
                if pipe.right_edge() < left_edge && pipe.credit(player.participant_id) {
                    player.score += 1;
                }
            }

            if collision::collides(player.x, player.y, self.lane.pipes(), WORLD_HEIGHT)
                && !player.is_invincible(now_ms)
            {
                player.alive = false;
                eliminated.push((player.join_order, player.participant_id, player.score));
            }
        }

        let best_score = self.best_living_score();
        self.lane.advance(dt, best_score, now_ms);

        eliminated.sort_by_key(|(order, _, _)| *order);
        report.eliminated = eliminated
            .into_iter()
            .map(|(_, id, score)| (id, score))
            .collect();
        report.game_over = alive_before > 0 && self.alive_count() == 0;
        report
    }
}
