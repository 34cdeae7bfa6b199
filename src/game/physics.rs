//! Bird physics: flap impulse and gravity integration

/// World width in px
pub const WORLD_WIDTH: f32 = 800.0;
/// World height in px, y grows downward
pub const WORLD_HEIGHT: f32 = 600.0;

/// Downward acceleration in px/s²
pub const GRAVITY: f32 = 600.0;
/// Vertical velocity set by a flap, in px/s
pub const FLAP_VELOCITY: f32 = -260.0;

/// Spawn point shared by every player
pub const SPAWN_X: f32 = 150.0;
pub const SPAWN_Y: f32 = 300.0;
/// Collision grace period after spawn, start and restart
pub const INVINCIBLE_MILLIS: u64 = 2_000;

/// Bird hitbox half extents
pub const BIRD_HALF_WIDTH: f32 = 16.0;
pub const BIRD_HALF_HEIGHT: f32 = 12.0;

/// Physics system for updating bird velocities and positions
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance one bird by `dt` seconds.
    /// A pending flap replaces the velocity before gravity is applied.
    /// Returns (new_y, new_vel_y)
    pub fn update_bird(y: f32, vel_y: f32, flap: bool, dt: f32) -> (f32, f32) {
        let vel_y = if flap { FLAP_VELOCITY } else { vel_y };

        // Semi-implicit Euler: velocity first, then position
        let new_vel_y = vel_y + GRAVITY * dt;
        let new_y = y + new_vel_y * dt;

        (new_y, new_vel_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.05;

    #[test]
    fn free_fall_from_spawn() {
        let (y, vel_y) = PhysicsSystem::update_bird(SPAWN_Y, 0.0, false, DT);
        assert!((vel_y - 30.0).abs() < 1e-4);
        assert!((y - 301.5).abs() < 1e-4);
    }

    #[test]
    fn flap_replaces_velocity_then_gravity_applies() {
        let (y, vel_y) = PhysicsSystem::update_bird(SPAWN_Y, 120.0, true, DT);
        assert!((vel_y - (FLAP_VELOCITY + GRAVITY * DT)).abs() < 1e-4);
        assert!(y < SPAWN_Y);
    }

    #[test]
    fn velocity_grows_by_gravity_each_step() {
        let mut y = SPAWN_Y;
        let mut vel_y = FLAP_VELOCITY;
        for _ in 0..10 {
            let previous = vel_y;
            (y, vel_y) = PhysicsSystem::update_bird(y, vel_y, false, DT);
            assert!((vel_y - (previous + GRAVITY * DT)).abs() < 1e-3);
        }
        assert!(y.is_finite());
    }
}
