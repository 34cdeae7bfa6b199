//! Time utilities for room simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 20; // 20 ticks per second
pub const TICK_MILLIS: u64 = 1_000 / SIMULATION_TPS as u64;

/// Fixed simulation step (in seconds)
pub fn tick_delta() -> f32 {
    TICK_MILLIS as f32 / 1000.0
}

/// Fixed simulation step as a `Duration`, for scheduling
pub fn tick_duration() -> Duration {
    Duration::from_millis(TICK_MILLIS)
}
