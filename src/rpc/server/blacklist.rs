//! Ignore sources that keep sending malformed datagrams.

use std::{
    net::IpAddr,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;
use tracing::debug;

/// Default number of malformed datagrams before an IP is blacklisted.
pub const DEFAULT_BLACKLIST_THRESHOLD: u32 = 5;
/// Default duration an IP stays blacklisted.
pub const DEFAULT_BLACKLIST_DURATION: Duration = Duration::from_secs(10 * 60);
/// Upper bound on tracked IPs, so spoofed sources can't grow the cache forever.
const MAX_TRACKED: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(max) => max,
    None => NonZeroUsize::MIN,
};

#[derive(Debug, Clone, Copy)]
struct Offender {
    strikes: u32,
    last_strike: Instant,
    banned_until: Option<Instant>,
}

#[derive(Debug)]
/// Per-IP malformed datagram counters, the least recently struck IP is forgotten first.
pub struct Blacklist {
    offenders: LruCache<IpAddr, Offender>,
    threshold: u32,
    duration: Duration,
}

impl Blacklist {
    pub fn new(threshold: u32, duration: Duration) -> Self {
        Self::with_capacity(threshold, duration, MAX_TRACKED)
    }

    fn with_capacity(threshold: u32, duration: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            offenders: LruCache::new(capacity),
            threshold: threshold.max(1),
            duration,
        }
    }

    /// Returns `true` if datagrams from `ip` should be dropped.
    pub fn is_blacklisted(&self, ip: &IpAddr, now: Instant) -> bool {
        self.offenders
            .peek(ip)
            .and_then(|offender| offender.banned_until)
            .map(|until| now < until)
            .unwrap_or(false)
    }

    /// Count a malformed datagram from `ip`.
    pub fn strike(&mut self, ip: IpAddr, now: Instant) {
        let threshold = self.threshold;
        let duration = self.duration;

        let offender = self.offenders.get_or_insert_mut(ip, || Offender {
            strikes: 0,
            last_strike: now,
            banned_until: None,
        });

        offender.strikes = offender.strikes.saturating_add(1);
        offender.last_strike = now;

        if offender.strikes >= threshold && offender.banned_until.is_none() {
            debug!(?ip, strikes = offender.strikes, "Blacklisting source");

            offender.banned_until = Some(now + duration);
        }
    }

    /// Forget offenders whose ban ended, or who have not misbehaved for a ban's duration.
    pub fn expire(&mut self, now: Instant) {
        let duration = self.duration;

        let expired: Vec<IpAddr> = self
            .offenders
            .iter()
            .filter(|(_, offender)| match offender.banned_until {
                Some(until) => now >= until,
                None => now.saturating_duration_since(offender.last_strike) >= duration,
            })
            .map(|(ip, _)| *ip)
            .collect();

        for ip in expired {
            self.offenders.pop(&ip);
        }
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new(DEFAULT_BLACKLIST_THRESHOLD, DEFAULT_BLACKLIST_DURATION)
    }
}
