//! Time utilities for room simulation and lobby bookkeeping

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Get current Unix timestamp in seconds
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
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
pub const SNAPSHOT_TPS: u32 = 20; // one snapshot per tick
pub const TICK_MS: u64 = 1_000 / SIMULATION_TPS as u64;

/// Fixed tick length as a `Duration`
pub fn tick_duration() -> Duration {
    Duration::from_millis(TICK_MS)
}

/// Convert a tick length in milliseconds to seconds for velocity integration
pub fn dt_secs(dt_ms: u64) -> f32 {
    dt_ms as f32 / 1000.0
}

/// Number of whole ticks covering `ms` milliseconds (rounded up)
pub fn ticks_for_ms(ms: u64) -> u64 {
    ms.div_ceil(TICK_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_constants_agree() {
        assert_eq!(TICK_MS, 50);
        assert_eq!(tick_duration(), Duration::from_millis(50));
        assert!((dt_secs(TICK_MS) - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn ticks_round_up() {
        assert_eq!(ticks_for_ms(3000), 60);
        assert_eq!(ticks_for_ms(3001), 61);
        assert_eq!(ticks_for_ms(0), 0);
    }
}
