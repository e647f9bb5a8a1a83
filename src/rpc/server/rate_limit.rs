//! Bounding how many incoming requests we answer.

use std::fmt::{self, Debug, Formatter};
use std::num::NonZeroU32;
use std::time::Instant;

use governor::{
    clock::{Clock, FakeRelativeClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Default sustained number of answered requests per second.
pub const DEFAULT_MAX_REQUESTS_PER_SECOND: u32 = 100;
/// Default number of requests that can be answered in a burst.
pub const DEFAULT_MAX_REQUEST_BURST: u32 = 400;

type DirectLimiter = RateLimiter<
    NotKeyed,
    InMemoryState,
    FakeRelativeClock,
    NoOpMiddleware<<FakeRelativeClock as Clock>::Instant>,
>;

/// A [governor] rate limiter following the time handed to the node,
/// so it works the same under [crate::Dht::tick_at] and [crate::Dht::on_datagram_at].
pub struct RequestLimiter {
    limiter: DirectLimiter,
    clock: FakeRelativeClock,
    quota: Quota,
    last_seen: Option<Instant>,
}

impl RequestLimiter {
    pub fn new(per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        let clock = FakeRelativeClock::default();

        Self {
            limiter: RateLimiter::direct_with_clock(quota, &clock),
            clock,
            quota,
            last_seen: None,
        }
    }

    /// Take one cell of the quota at `now`, returns `false` if the request should be dropped.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last_seen) = self.last_seen {
            self.clock.advance(now.saturating_duration_since(last_seen));
        }
        self.last_seen = Some(self.last_seen.map_or(now, |last_seen| last_seen.max(now)));

        self.limiter.check().is_ok()
    }
}

impl Debug for RequestLimiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("quota", &self.quota)
            .finish()
    }
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS_PER_SECOND, DEFAULT_MAX_REQUEST_BURST)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn burst_then_refill() {
        let mut limiter = RequestLimiter::new(10, 3);
        let now = Instant::now();

        assert!(limiter.try_acquire(now));
        assert!(limiter.try_acquire(now));
        assert!(limiter.try_acquire(now));
        assert!(!limiter.try_acquire(now));

        // 10 per second is one every 100ms.
        let later = now + Duration::from_millis(100);
        assert!(limiter.try_acquire(later));
        assert!(!limiter.try_acquire(later));

        // Never more than the burst.
        let much_later = later + Duration::from_secs(60);
        for _ in 0..3 {
            assert!(limiter.try_acquire(much_later));
        }
        assert!(!limiter.try_acquire(much_later));
    }

    #[test]
    fn time_going_backwards_grants_nothing() {
        let mut limiter = RequestLimiter::new(1, 1);
        let now = Instant::now() + Duration::from_secs(10);

        assert!(limiter.try_acquire(now));
        assert!(!limiter.try_acquire(now - Duration::from_secs(5)));
        assert!(!limiter.try_acquire(now));
        assert!(limiter.try_acquire(now + Duration::from_secs(1)));
    }
}
