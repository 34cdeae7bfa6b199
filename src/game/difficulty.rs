//! Difficulty scaling driven by the best living score

pub const INITIAL_GAP_HEIGHT: f32 = 150.0;
pub const MIN_GAP_HEIGHT: f32 = 75.0;
pub const GAP_REDUCTION_PER_POINT: f32 = 1.0;

pub const INITIAL_SPAWN_INTERVAL_MS: u64 = 3_000;
pub const MIN_SPAWN_INTERVAL_MS: u64 = 1_200;
pub const INTERVAL_REDUCTION_PER_POINT_MS: u64 = 25;

/// Obstacle parameters for the current best score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Difficulty {
    pub gap_height: f32,
    pub spawn_interval_ms: u64,
}

impl Difficulty {
    pub fn for_score(best_score: u32) -> Self {
        let gap_height =
            (INITIAL_GAP_HEIGHT - best_score as f32 * GAP_REDUCTION_PER_POINT).max(MIN_GAP_HEIGHT);

        let reduction = (best_score as u64).saturating_mul(INTERVAL_REDUCTION_PER_POINT_MS);
        let spawn_interval_ms = INITIAL_SPAWN_INTERVAL_MS
            .saturating_sub(reduction)
            .max(MIN_SPAWN_INTERVAL_MS);

        Self {
            gap_height,
            spawn_interval_ms,
        }
    }
}
