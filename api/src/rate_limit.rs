//! Process-wide request rate limits.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Seconds a rate-limited client is told to wait.
pub const RETRY_AFTER_SECS: u64 = 60;

/// One limiter per protected route group.
pub struct RateLimiters {
    audio: DefaultDirectRateLimiter,
    default: DefaultDirectRateLimiter,
}

fn per_second(rps: u32) -> DefaultDirectRateLimiter {
    let rps = NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rps))
}

impl RateLimiters {
    pub fn new(audio_rps: u32, default_rps: u32) -> Self {
        Self {
            audio: per_second(audio_rps),
            default: per_second(default_rps),
        }
    }

    /// True if an audio stream request may proceed.
    pub fn allow_audio(&self) -> bool {
        self.audio.check().is_ok()
    }

    /// True if a request on another rate-limited route may proceed.
    pub fn allow_default(&self) -> bool {
        self.default.check().is_ok()
    }
}
