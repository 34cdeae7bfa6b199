//! Obstacle lane: pipe advance, recycling and difficulty-scaled spawning

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashSet, VecDeque};

use crate::ws::protocol::{ParticipantId, PipeSnapshot};

use super::difficulty::{Difficulty, INITIAL_SPAWN_INTERVAL_MS};
use super::physics::WORLD_WIDTH;

/// Horizontal pipe speed in px/s
pub const PIPE_SPEED: f32 = 120.0;
/// Pipe half width (pipes are 64 px wide)
pub const PIPE_HALF_WIDTH: f32 = 32.0;
/// Pipes spawn this far past the right world edge
pub const SPAWN_LEAD: f32 = 100.0;
/// Pipes are dropped once their x falls below this
pub const DESPAWN_X: f32 = -100.0;
/// Band for random gap centers
pub const GAP_CENTER_MIN: f32 = 120.0;
pub const GAP_CENTER_MAX: f32 = 480.0;
/// Delay before the first pipe after arming the lane
pub const FIRST_PIPE_DELAY_MS: u64 = 1_000;

/// A pipe pair with a passable gap
#[derive(Debug, Clone)]
pub struct Pipe {
    pub id: u64,
    pub x: f32,
    pub gap_y: f32,
    pub gap_height: f32,
    passed_by: HashSet<ParticipantId>,
}

impl Pipe {
    pub fn new(id: u64, x: f32, gap_y: f32, gap_height: f32) -> Self {
        Self {
            id,
            x,
            gap_y,
            gap_height,
            passed_by: HashSet::new(),
        }
    }

    /// (top, bottom) of the gap
    pub fn gap_bounds(&self) -> (f32, f32) {
        let half = self.gap_height / 2.0;
        (self.gap_y - half, self.gap_y + half)
    }

    pub fn right_edge(&self) -> f32 {
        self.x + PIPE_HALF_WIDTH
    }

    /// Record that a player cleared this pipe. Returns false if already credited.
    pub fn credit(&mut self, participant_id: ParticipantId) -> bool {
        self.passed_by.insert(participant_id)
    }

    pub fn was_credited(&self, participant_id: &ParticipantId) -> bool {
        self.passed_by.contains(participant_id)
    }

    pub fn snapshot(&self) -> PipeSnapshot {
        let mut passed_by: Vec<ParticipantId> = self.passed_by.iter().copied().collect();
        passed_by.sort_unstable();
        PipeSnapshot {
            id: self.id,
            x: self.x,
            gap_y: self.gap_y,
            gap_height: self.gap_height,
            passed_by,
        }
    }
}

/// Ordered pipes of one room, oldest (leftmost) first
pub struct ObstacleLane {
    pipes: VecDeque<Pipe>,
    last_spawn_at: u64,
    next_pipe_id: u64,
    rng: ChaCha8Rng,
}

impl ObstacleLane {
    pub fn new(seed: u64) -> Self {
        Self {
            pipes: VecDeque::new(),
            last_spawn_at: 0,
            next_pipe_id: 1,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Clear all pipes and schedule the first spawn `FIRST_PIPE_DELAY_MS` after `now_ms`
    pub fn arm(&mut self, now_ms: u64) {
        self.pipes.clear();
        self.last_spawn_at = now_ms
            .saturating_add(FIRST_PIPE_DELAY_MS)
            .saturating_sub(INITIAL_SPAWN_INTERVAL_MS);
    }

    /// Move, recycle and maybe spawn. Returns the id of a newly spawned pipe.
    pub fn advance(&mut self, dt: f32, best_score: u32, now_ms: u64) -> Option<u64> {
        let dx = PIPE_SPEED * dt;
        for pipe in self.pipes.iter_mut() {
            pipe.x -= dx;
        }

        // Pipes never reorder, so expired ones are always at the front
        while self.pipes.front().map_or(false, |p| p.x < DESPAWN_X) {
            self.pipes.pop_front();
        }

        let difficulty = Difficulty::for_score(best_score);
        if now_ms.saturating_sub(self.last_spawn_at) > difficulty.spawn_interval_ms {
            let id = self.spawn(difficulty.gap_height);
            self.last_spawn_at = now_ms;
            return Some(id);
        }

        None
    }

    fn spawn(&mut self, gap_height: f32) -> u64 {
        let id = self.next_pipe_id;
        self.next_pipe_id += 1;

        let gap_y = self.rng.gen_range(GAP_CENTER_MIN..GAP_CENTER_MAX);
        self.pipes
            .push_back(Pipe::new(id, WORLD_WIDTH + SPAWN_LEAD, gap_y, gap_height));
        id
    }

    pub fn pipes(&self) -> &VecDeque<Pipe> {
        &self.pipes
    }

    pub fn pipes_mut(&mut self) -> impl Iterator<Item = &mut Pipe> {
        self.pipes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn push_pipe(&mut self, pipe: Pipe) {
        self.pipes.push_back(pipe);
    }
}
