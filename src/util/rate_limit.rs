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

/// Motion packets per second per participant
pub const MOTION_RATE_LIMIT: u32 = 30;

/// Ability activations per second per participant
pub const ABILITY_RATE_LIMIT: u32 = 10;

/// Per-participant inbound limits, one bucket per packet family
#[derive(Clone)]
pub struct PlayerRateLimiter {
    motion_limiter: Arc<Limiter>,
    ability_limiter: Arc<Limiter>,
}

impl PlayerRateLimiter {
    pub fn new() -> Self {
        Self {
            motion_limiter: create_limiter(MOTION_RATE_LIMIT),
            ability_limiter: create_limiter(ABILITY_RATE_LIMIT),
        }
    }

    /// Move, stop, jump and ping packets
    pub fn check_motion(&self) -> bool {
        self.motion_limiter.check().is_ok()
    }

    pub fn check_ability(&self) -> bool {
        self.ability_limiter.check().is_ok()
    }
}

impl Default for PlayerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
