//! Prefix-bucketed Kademlia routing table, one bucket list per address family.

use std::cmp::Reverse;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::common::{AddressFamily, Id, Node, MAX_DISTANCE};
use crate::Error;

/// K = the maximum number of entries in a bucket.
pub const MAX_BUCKET_SIZE_K: usize = 8;

/// A node that has not replied for this long is no longer considered good.
pub const DEFAULT_GOOD_NODE_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Unanswered requests after which a node is considered bad.
pub const DEFAULT_MAX_UNANSWERED_PINGS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Liveness estimate of a routing table entry.
pub enum Quality {
    /// Replied recently.
    Good,
    /// Not heard from recently, or never replied to us.
    Dubious,
    /// Failed to answer several consecutive requests, can be evicted.
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Which full buckets may split when a new node does not fit.
pub enum SplitPolicy {
    /// Only the bucket whose range covers our own Id splits.
    ///
    /// Resolution concentrates around our own Id, as in BEP_0005.
    #[default]
    OwnBucket,
    /// Any full bucket splits.
    ///
    /// Keeps more nodes far from our own Id at the cost of memory, table size
    /// grows with the number of distinct nodes seen rather than log2 of the network.
    AnyBucket,
}

/// How a contact was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Seen {
    /// It replied to one of our requests.
    Reply,
    /// It sent us a request.
    Request,
    /// Another node told us about it, or the caller restored it.
    Hearsay,
}

#[derive(Debug, Clone, PartialEq)]
/// Routing table entry.
pub struct NodeEntry {
    id: Id,
    address: SocketAddr,
    last_seen: Instant,
    last_reply: Option<Instant>,
    quality: Quality,
    pending_pings: u8,
    last_pinged: Option<Instant>,
}

impl NodeEntry {
    fn new(id: Id, address: SocketAddr, seen: Seen, now: Instant) -> Self {
        let replied = seen == Seen::Reply;

        NodeEntry {
            id,
            address,
            last_seen: now,
            last_reply: replied.then_some(now),
            quality: if replied {
                Quality::Good
            } else {
                Quality::Dubious
            },
            pending_pings: 0,
            last_pinged: None,
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Last time we received anything from this node.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Last time this node replied to one of our requests.
    pub fn last_reply(&self) -> Option<Instant> {
        self.last_reply
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Consecutive requests this node did not answer.
    pub fn pending_pings(&self) -> u8 {
        self.pending_pings
    }

    pub fn last_pinged(&self) -> Option<Instant> {
        self.last_pinged
    }

    pub fn to_node(&self) -> Node {
        Node::new(self.id, self.address)
    }

    fn replied_within(&self, window: Duration, now: Instant) -> bool {
        self.last_reply
            .map(|at| now.saturating_duration_since(at) < window)
            .unwrap_or(false)
    }
}

/// A contiguous range of the Id space: all Ids sharing the first `depth` bits of `first`.
#[derive(Debug, Clone)]
pub struct Bucket {
    first: Id,
    depth: u8,
    /// Ordered by the least recently seen first.
    entries: Vec<NodeEntry>,
    last_changed: Instant,
    /// A contact that did not fit, promoted when an entry goes bad.
    replacement: Option<Node>,
}

impl Bucket {
    fn new(first: Id, depth: u8, now: Instant) -> Self {
        Bucket {
            first,
            depth,
            entries: Vec::with_capacity(MAX_BUCKET_SIZE_K),
            last_changed: now,
            replacement: None,
        }
    }

    // === Getters ===

    /// Lowest Id in this bucket's range.
    pub fn first(&self) -> &Id {
        &self.first
    }

    /// Length of this bucket's prefix in bits.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn entries(&self) -> &[NodeEntry] {
        &self.entries
    }

    pub fn last_changed(&self) -> Instant {
        self.last_changed
    }

    pub fn replacement(&self) -> Option<&Node> {
        self.replacement.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `id` falls within this bucket's range.
    pub fn covers(&self, id: &Id) -> bool {
        id.has_prefix(&self.first, self.depth)
    }

    /// A random Id inside this bucket's range.
    pub fn random_id(&self) -> Id {
        Id::random_in_prefix(&self.first, self.depth)
    }

    fn position(&self, id: &Id) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.id == id)
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= MAX_BUCKET_SIZE_K
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Number of routing table entries per [Quality].
pub struct NodeCounts {
    pub good: usize,
    pub dubious: usize,
    pub bad: usize,
    /// Contacts waiting for a slot in a full bucket.
    pub replacements: usize,
}

#[derive(Debug, Clone)]
/// Kademlia routing table partitioning the whole Id space into buckets,
/// kept separately for IPv4 and IPv6 contacts.
pub struct RoutingTable {
    id: Id,
    split_policy: SplitPolicy,
    good_node_window: Duration,
    max_unanswered_pings: u8,
    v4: Vec<Bucket>,
    v6: Vec<Bucket>,
    splits: usize,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        let now = Instant::now();

        RoutingTable {
            id,
            split_policy: SplitPolicy::default(),
            good_node_window: DEFAULT_GOOD_NODE_WINDOW,
            max_unanswered_pings: DEFAULT_MAX_UNANSWERED_PINGS,
            v4: vec![Bucket::new(Id::default(), 0, now)],
            v6: vec![Bucket::new(Id::default(), 0, now)],
            splits: 0,
        }
    }

    // === Options ===

    pub fn with_split_policy(mut self, split_policy: SplitPolicy) -> Self {
        self.split_policy = split_policy;
        self
    }

    pub fn with_good_node_window(mut self, window: Duration) -> Self {
        self.good_node_window = window;
        self
    }

    pub fn with_max_unanswered_pings(mut self, max: u8) -> Self {
        self.max_unanswered_pings = max.max(1);
        self
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Buckets of one address family, ordered by their range.
    pub fn buckets(&self, family: AddressFamily) -> &[Bucket] {
        match family {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        }
    }

    /// Number of bucket splits performed so far.
    pub fn splits(&self) -> usize {
        self.splits
    }

    /// Number of entries for this address family.
    pub fn len(&self, family: AddressFamily) -> usize {
        self.buckets(family).iter().map(Bucket::len).sum()
    }

    /// Returns `true` if this routing table has no entries in either family.
    pub fn is_empty(&self) -> bool {
        self.v4.iter().chain(self.v6.iter()).all(Bucket::is_empty)
    }

    pub fn counts(&self, family: AddressFamily) -> NodeCounts {
        let mut counts = NodeCounts::default();

        for bucket in self.buckets(family) {
            for entry in &bucket.entries {
                match entry.quality {
                    Quality::Good => counts.good += 1,
                    Quality::Dubious => counts.dubious += 1,
                    Quality::Bad => counts.bad += 1,
                }
            }
            if bucket.replacement.is_some() {
                counts.replacements += 1;
            }
        }

        counts
    }

    /// Returns an iterator over the entries of an address family.
    pub fn entries(&self, family: AddressFamily) -> impl Iterator<Item = &NodeEntry> {
        self.buckets(family)
            .iter()
            .flat_map(|bucket| bucket.entries.iter())
    }

    /// Export good nodes, to be restored with [crate::Dht::insert_node] after a restart.
    pub fn good_nodes(&self, family: AddressFamily) -> Vec<Node> {
        self.entries(family)
            .filter(|entry| entry.quality == Quality::Good)
            .map(NodeEntry::to_node)
            .collect()
    }

    pub fn get(&self, family: AddressFamily, id: &Id) -> Option<&NodeEntry> {
        let buckets = self.buckets(family);
        let bucket = &buckets[bucket_index(buckets, id)];

        bucket.position(id).map(|index| &bucket.entries[index])
    }

    pub fn contains(&self, family: AddressFamily, id: &Id) -> bool {
        self.get(family, id).is_some()
    }

    /// The bucket whose range covers `id`.
    pub fn bucket_for(&self, family: AddressFamily, id: &Id) -> &Bucket {
        let buckets = self.buckets(family);
        &buckets[bucket_index(buckets, id)]
    }

    // === Public Methods ===

    /// Record that `id` at `address` replied to us, marking it [Quality::Good].
    ///
    /// Returns [Error::TableFull] if its bucket is full of good and dubious nodes
    /// and can't split, in which case nothing is evicted.
    pub fn insert_or_refresh(&mut self, id: Id, address: SocketAddr) -> Result<(), Error> {
        self.insert_at(id, address, Seen::Reply, Instant::now())
    }

    /// Record a contact we heard of without it replying to us.
    ///
    /// Existing entries are not upgraded, new ones start [Quality::Dubious].
    pub fn note(&mut self, id: Id, address: SocketAddr) -> Result<(), Error> {
        self.insert_at(id, address, Seen::Hearsay, Instant::now())
    }

    /// Return up to `n` non-bad entries closest to `target`, closest first.
    ///
    /// Entries at equal distance are ordered by the most recently seen first.
    pub fn closest(&self, target: &Id, family: AddressFamily, n: usize) -> Vec<NodeEntry> {
        let mut entries: Vec<&NodeEntry> = self
            .entries(family)
            .filter(|entry| entry.quality != Quality::Bad)
            .collect();

        entries.sort_by_key(|entry| (entry.id.xor(target), Reverse(entry.last_seen)));

        entries.into_iter().take(n).cloned().collect()
    }

    /// Same as [Self::closest] but returns contacts for messages and searches.
    pub fn closest_nodes(&self, target: &Id, family: AddressFamily, n: usize) -> Vec<Node> {
        self.closest(target, family, n)
            .iter()
            .map(NodeEntry::to_node)
            .collect()
    }

    /// Record that a request to `id` went unanswered.
    ///
    /// Returns the entry's new quality, or `None` if it is not in the table.
    pub fn mark_unresponsive(&mut self, id: &Id, family: AddressFamily) -> Option<Quality> {
        self.mark_unresponsive_at(id, family, Instant::now())
    }

    // === Crate Methods ===

    pub(crate) fn insert_at(
        &mut self,
        id: Id,
        address: SocketAddr,
        seen: Seen,
        now: Instant,
    ) -> Result<(), Error> {
        if id == self.id {
            // Do not add self to the routing_table
            return Ok(());
        }

        let own_id = self.id;
        let split_policy = self.split_policy;
        let buckets = match AddressFamily::of(&address) {
            AddressFamily::Ipv4 => &mut self.v4,
            AddressFamily::Ipv6 => &mut self.v6,
        };

        loop {
            let index = bucket_index(buckets, &id);
            let bucket = &mut buckets[index];

            if let Some(position) = bucket.position(&id) {
                refresh_entry(bucket, position, address, seen, now);
                return Ok(());
            }

            if !bucket.is_full() {
                bucket.entries.push(NodeEntry::new(id, address, seen, now));
                bucket.last_changed = now;
                return Ok(());
            }

            if let Some(position) = bucket
                .entries
                .iter()
                .position(|entry| entry.quality == Quality::Bad)
            {
                let evicted = bucket.entries.remove(position);
                trace!(evicted = ?evicted.id, incoming = ?id, "Evicting bad node");

                bucket.entries.push(NodeEntry::new(id, address, seen, now));
                bucket.last_changed = now;
                return Ok(());
            }

            let splittable = bucket.depth < MAX_DISTANCE
                && match split_policy {
                    SplitPolicy::OwnBucket => bucket.covers(&own_id),
                    SplitPolicy::AnyBucket => true,
                };

            if splittable {
                split(buckets, index, &id, &own_id, split_policy);
                self.splits += 1;
                continue;
            }

            if bucket.replacement.is_none() || seen != Seen::Hearsay {
                bucket.replacement = Some(Node::new(id, address));
            }

            return Err(Error::TableFull);
        }
    }

    pub(crate) fn mark_unresponsive_at(
        &mut self,
        id: &Id,
        family: AddressFamily,
        now: Instant,
    ) -> Option<Quality> {
        let good_node_window = self.good_node_window;
        let max_unanswered_pings = self.max_unanswered_pings;
        let buckets = match family {
            AddressFamily::Ipv4 => &mut self.v4,
            AddressFamily::Ipv6 => &mut self.v6,
        };

        let index = bucket_index(buckets, id);
        let bucket = &mut buckets[index];
        let position = bucket.position(id)?;
        let entry = &mut bucket.entries[position];

        entry.pending_pings = entry.pending_pings.saturating_add(1);

        if entry.pending_pings >= max_unanswered_pings {
            entry.quality = Quality::Bad;
        } else if entry.quality == Quality::Good && !entry.replied_within(good_node_window, now)
        {
            entry.quality = Quality::Dubious;
        }

        let quality = entry.quality;

        if quality == Quality::Bad {
            if let Some(replacement) = bucket.replacement.take() {
                trace!(bad = ?id, replacement = ?replacement.id, "Replacing bad node");

                bucket.entries.remove(position);
                bucket.entries.push(NodeEntry::new(
                    replacement.id,
                    replacement.address,
                    Seen::Hearsay,
                    now,
                ));
                bucket.last_changed = now;
            }
        }

        Some(quality)
    }

    pub(crate) fn age_at(&mut self, now: Instant) {
        let window = self.good_node_window;

        for bucket in self.v4.iter_mut().chain(self.v6.iter_mut()) {
            for entry in bucket.entries.iter_mut() {
                if entry.quality == Quality::Good && !entry.replied_within(window, now) {
                    entry.quality = Quality::Dubious;
                }
            }
        }
    }

    /// Record that we just sent a request to `id`.
    pub(crate) fn mark_pinged(&mut self, id: &Id, family: AddressFamily, now: Instant) {
        let buckets = match family {
            AddressFamily::Ipv4 => &mut self.v4,
            AddressFamily::Ipv6 => &mut self.v6,
        };
        let index = bucket_index(buckets, id);
        let bucket = &mut buckets[index];

        if let Some(position) = bucket.position(id) {
            bucket.entries[position].last_pinged = Some(now);
        }
    }

    /// Dubious entries that were not pinged within `backoff`.
    pub(crate) fn dubious_to_ping(
        &self,
        family: AddressFamily,
        now: Instant,
        backoff: Duration,
    ) -> Vec<Node> {
        self.entries(family)
            .filter(|entry| entry.quality == Quality::Dubious)
            .filter(|entry| {
                entry
                    .last_pinged
                    .map(|at| now.saturating_duration_since(at) >= backoff)
                    .unwrap_or(true)
            })
            .map(NodeEntry::to_node)
            .collect()
    }

    /// For each bucket unchanged for `interval`: a random target in its range and the
    /// node to ask about it. Marks those buckets as changed.
    pub(crate) fn refresh_targets(
        &mut self,
        family: AddressFamily,
        now: Instant,
        interval: Duration,
    ) -> Vec<(Id, Option<Node>)> {
        let stale: Vec<usize> = self
            .buckets(family)
            .iter()
            .enumerate()
            .filter(|(_, bucket)| now.saturating_duration_since(bucket.last_changed) >= interval)
            .map(|(index, _)| index)
            .collect();

        let mut targets = Vec::with_capacity(stale.len());

        for index in stale {
            let target = self.buckets(family)[index].random_id();

            let node = self.buckets(family)[index]
                .entries
                .iter()
                .rev()
                .find(|entry| entry.quality != Quality::Bad)
                .map(NodeEntry::to_node)
                .or_else(|| self.closest_nodes(&target, family, 1).into_iter().next());

            targets.push((target, node));

            let buckets = match family {
                AddressFamily::Ipv4 => &mut self.v4,
                AddressFamily::Ipv6 => &mut self.v6,
            };
            buckets[index].last_changed = now;
        }

        targets
    }
}

// === Private Functions ===

/// Index of the bucket covering `id`, buckets are sorted by their first Id and start at zero.
fn bucket_index(buckets: &[Bucket], id: &Id) -> usize {
    buckets
        .partition_point(|bucket| bucket.first <= *id)
        .saturating_sub(1)
}

fn refresh_entry(bucket: &mut Bucket, position: usize, address: SocketAddr, seen: Seen, now: Instant) {
    let entry = &mut bucket.entries[position];

    match seen {
        Seen::Reply => {
            // Replies come from the address the request was sent to,
            // so a changed address is trusted.
            entry.address = address;
            entry.last_seen = now;
            entry.last_reply = Some(now);
            entry.quality = Quality::Good;
            entry.pending_pings = 0;
            bucket.last_changed = now;
        }
        Seen::Request => {
            if entry.address != address {
                return;
            }
            entry.last_seen = now;
        }
        Seen::Hearsay => return,
    }

    // Keep least recently seen first.
    let entry = bucket.entries.remove(position);
    bucket.entries.push(entry);
}

/// Split the bucket at `index` at the first prefix bit that separates its ids,
/// replacing it with the resulting buckets.
///
/// Halving continues while every id (entries plus `incoming`) would land on the
/// same side, and with [SplitPolicy::OwnBucket] only while our own id is on that side too.
/// The other halves become empty buckets, so the table still covers the whole Id space.
fn split(
    buckets: &mut Vec<Bucket>,
    index: usize,
    incoming: &Id,
    own_id: &Id,
    split_policy: SplitPolicy,
) {
    let bucket = buckets.remove(index);
    let ids: Vec<Id> = bucket
        .entries
        .iter()
        .map(|entry| entry.id)
        .chain(std::iter::once(*incoming))
        .collect();

    let mut first = bucket.first;
    let mut depth = bucket.depth;
    let mut created = Vec::new();

    loop {
        let low = first;
        let high = first.with_bit(depth);
        let bit = depth;
        depth += 1;

        let all_high = ids.iter().all(|id| id.bit(bit));
        let all_low = ids.iter().all(|id| !id.bit(bit));
        let own_follows = match split_policy {
            SplitPolicy::OwnBucket => own_id.bit(bit) == all_high,
            SplitPolicy::AnyBucket => true,
        };

        if (all_high || all_low) && own_follows && depth < MAX_DISTANCE {
            let (full, empty) = if all_high { (high, low) } else { (low, high) };

            created.push(Bucket::new(empty, depth, bucket.last_changed));
            first = full;
            continue;
        }

        created.push(Bucket::new(low, depth, bucket.last_changed));
        created.push(Bucket::new(high, depth, bucket.last_changed));
        break;
    }

    created.sort_by(|a, b| a.first.cmp(&b.first));

    for entry in bucket.entries {
        if let Some(target) = created.iter_mut().find(|b| b.covers(&entry.id)) {
            target.entries.push(entry);
        }
    }
    if let Some(replacement) = bucket.replacement {
        if let Some(target) = created.iter_mut().find(|b| b.covers(&replacement.id)) {
            target.replacement = Some(replacement);
        }
    }

    trace!(
        from_depth = bucket.depth,
        to_depth = depth,
        buckets = created.len(),
        "Split bucket"
    );

    buckets.splice(index..index, created);
}
