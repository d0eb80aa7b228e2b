//! Time utilities for the match clock

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

/// Default tick rate of a match session
pub const DEFAULT_TICK_RATE: u32 = 60; // 60 ticks per second

/// Upper bound on a single tick's delta, so a stalled task cannot teleport the ball
pub const MAX_TICK_DT: f32 = 0.1;

/// Tick period for the given rate
pub fn tick_period(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate.max(1) as u64)
}

/// Delta time (seconds) between two tick timestamps, clamped to `MAX_TICK_DT`
pub fn tick_delta(last: tokio::time::Instant, now: tokio::time::Instant) -> f32 {
    now.saturating_duration_since(last)
        .as_secs_f32()
        .min(MAX_TICK_DT)
}
