//! Routing table maintenance timers.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::common::{AddressFamily, RoutingTable};

/// Interval between sweeps of expired announced peers and blacklist entries.
pub const EXPIRY_INTERVAL: Duration = Duration::from_secs(60);
/// Upper bound on dubious nodes pinged in a single tick.
pub const MAX_PINGS_PER_TICK: usize = 8;

/// Decisions about routing table maintenance
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceDecisions {
    /// Send a find_node for our own Id to the bootstrap addresses.
    pub should_bootstrap: bool,
    /// Families whose table just got its first nodes, to populate with a lookup of our own Id.
    pub self_lookups: Vec<AddressFamily>,
    /// Sweep expired peers and blacklist entries.
    pub should_expire: bool,
}

/// Routing table maintenance state
#[derive(Debug)]
pub struct Maintenance {
    last_bootstrap: Option<Instant>,
    last_expiry: Instant,
    populated: HashSet<AddressFamily>,
}

impl Maintenance {
    pub fn new(now: Instant) -> Self {
        Self {
            last_bootstrap: None,
            last_expiry: now,
            populated: HashSet::new(),
        }
    }

    /// Determine what maintenance operations should be performed.
    ///
    /// Computes decisions and resets internal timers when intervals elapse.
    pub fn decisions_at(
        &mut self,
        now: Instant,
        routing_table: &RoutingTable,
        families: &[AddressFamily],
        bootstrap_interval: Duration,
    ) -> MaintenanceDecisions {
        let mut decisions = MaintenanceDecisions::default();

        if routing_table.is_empty() {
            let due = self
                .last_bootstrap
                .map(|at| now.saturating_duration_since(at) >= bootstrap_interval)
                .unwrap_or(true);

            if due {
                self.last_bootstrap = Some(now);
                decisions.should_bootstrap = true;
            }
        }

        for family in families {
            if routing_table.len(*family) == 0 {
                self.populated.remove(family);
            } else if self.populated.insert(*family) {
                decisions.self_lookups.push(*family);
            }
        }

        if now.saturating_duration_since(self.last_expiry) >= EXPIRY_INTERVAL {
            self.last_expiry = now;
            decisions.should_expire = true;
        }

        decisions
    }
}
