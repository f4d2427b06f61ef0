//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Game socket messages per second (input frames arrive once per client frame)
pub const ROOM_INPUT_RATE_LIMIT: u32 = 30;

/// Lobby socket messages per second
pub const LOBBY_RATE_LIMIT: u32 = 10;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    /// Limiter for a game socket
    pub fn for_room() -> Self {
        Self {
            limiter: create_limiter(ROOM_INPUT_RATE_LIMIT),
        }
    }

    /// Limiter for a lobby socket
    pub fn for_lobby() -> Self {
        Self {
            limiter: create_limiter(LOBBY_RATE_LIMIT),
        }
    }

    /// Check if a message is allowed (returns true if allowed)
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
