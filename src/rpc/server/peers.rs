//! Manage announced peers for info_hashes

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use rand::{thread_rng, Rng};

use lru::LruCache;

use crate::common::{AddressFamily, Id};

/// Default number of info hashes we store peers for.
pub const DEFAULT_MAX_INFO_HASHES: usize = 2000;
/// Default number of peers stored per info hash.
pub const DEFAULT_MAX_PEERS_PER_INFO_HASH: usize = 100;
/// Default duration an announced peer is handed out for.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(30 * 60);
/// Maximum number of peers returned in a single get_peers response.
pub const MAX_VALUES: usize = 50;

#[derive(Debug)]
/// An LRU cache of announced peers per info hash, each remembered with the time of its announce.
///
/// Read [BEP_0005](https://www.bittorrent.org/beps/bep_0005.html) for more information.
pub struct PeersStore {
    info_hashes: LruCache<Id, LruCache<SocketAddr, Instant>>,
    max_peers: NonZeroUsize,
    ttl: Duration,
}

impl PeersStore {
    pub fn new(max_info_hashes: NonZeroUsize, max_peers: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            info_hashes: LruCache::new(max_info_hashes),
            max_peers,
            ttl,
        }
    }

    /// Number of info hashes with at least one stored peer.
    pub fn len(&self) -> usize {
        self.info_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.info_hashes.is_empty()
    }

    pub fn add_peer(&mut self, info_hash: Id, peer: SocketAddr, now: Instant) {
        if let Some(info_hash_lru) = self.info_hashes.get_mut(&info_hash) {
            info_hash_lru.put(peer, now);
        } else {
            let mut info_hash_lru = LruCache::new(self.max_peers);
            info_hash_lru.put(peer, now);
            self.info_hashes.put(info_hash, info_hash_lru);
        };
    }

    /// Up to [MAX_VALUES] random unexpired peers of one address family.
    pub fn get_random_peers(
        &mut self,
        info_hash: &Id,
        family: AddressFamily,
        now: Instant,
    ) -> Option<Vec<SocketAddr>> {
        let ttl = self.ttl;
        let info_hash_lru = self.info_hashes.get(info_hash)?;

        let candidates: Vec<SocketAddr> = info_hash_lru
            .iter()
            .filter(|(_, announced_at)| now.saturating_duration_since(**announced_at) < ttl)
            .map(|(peer, _)| *peer)
            .filter(|peer| AddressFamily::of(peer) == family)
            .collect();

        if candidates.is_empty() {
            return None;
        }
        if candidates.len() <= MAX_VALUES {
            return Some(candidates);
        }

        let mut results = Vec::with_capacity(MAX_VALUES);
        let mut rng = thread_rng();

        for (index, peer) in candidates.iter().enumerate() {
            // Calculate the chance of adding the current item based on remaining items and slots
            let remaining_slots = MAX_VALUES - results.len();
            let remaining_items = candidates.len() - index;
            let current_chance = remaining_slots as f64 / remaining_items as f64;

            if rng.gen_bool(current_chance.min(1.0)) {
                results.push(*peer);
                if results.len() == MAX_VALUES {
                    break;
                }
            }
        }

        Some(results)
    }

    /// Drop peers announced longer than the ttl ago, and info hashes left without peers.
    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        let mut empty = vec![];

        for (info_hash, peers) in self.info_hashes.iter_mut() {
            let expired: Vec<SocketAddr> = peers
                .iter()
                .filter(|(_, announced_at)| now.saturating_duration_since(**announced_at) >= ttl)
                .map(|(peer, _)| *peer)
                .collect();

            for peer in expired {
                peers.pop(&peer);
            }

            if peers.is_empty() {
                empty.push(*info_hash);
            }
        }

        for info_hash in empty {
            self.info_hashes.pop(&info_hash);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store(max_info_hashes: usize, max_peers: usize) -> PeersStore {
        PeersStore::new(
            NonZeroUsize::new(max_info_hashes).unwrap(),
            NonZeroUsize::new(max_peers).unwrap(),
            DEFAULT_PEER_TTL,
        )
    }

    #[test]
    fn max_info_hashes() {
        let mut store = store(1, 100);
        let now = Instant::now();

        let info_hash_a = Id::random();
        let info_hash_b = Id::random();

        store.add_peer(info_hash_a, SocketAddr::from(([127, 0, 1, 1], 1)), now);
        store.add_peer(info_hash_b, SocketAddr::from(([127, 0, 1, 1], 1)), now);

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get_random_peers(&info_hash_b, AddressFamily::Ipv4, now),
            Some(vec![SocketAddr::from(([127, 0, 1, 1], 1))])
        );
    }

    #[test]
    fn all_peers() {
        let mut store = store(1, 2);
        let now = Instant::now();

        let info_hash = Id::random();

        store.add_peer(info_hash, SocketAddr::from(([127, 0, 1, 1], 1)), now);
        store.add_peer(info_hash, SocketAddr::from(([127, 0, 1, 2], 1)), now);
        store.add_peer(info_hash, SocketAddr::from(([127, 0, 1, 3], 1)), now);

        assert_eq!(
            store.get_random_peers(&info_hash, AddressFamily::Ipv4, now),
            Some(vec![
                SocketAddr::from(([127, 0, 1, 3], 1)),
                SocketAddr::from(([127, 0, 1, 2], 1)),
            ])
        );
    }

    #[test]
    fn reannounce_is_not_duplicated() {
        let mut store = store(1, 10);
        let now = Instant::now();
        let info_hash = Id::random();
        let peer = SocketAddr::from(([127, 0, 1, 1], 1));

        store.add_peer(info_hash, peer, now);
        store.add_peer(info_hash, peer, now + Duration::from_secs(1));

        assert_eq!(
            store.get_random_peers(&info_hash, AddressFamily::Ipv4, now),
            Some(vec![peer])
        );
    }

    #[test]
    fn random_peers_subset() {
        let mut store = store(1, 200);
        let now = Instant::now();

        let info_hash = Id::random();

        for i in 0..200 {
            store.add_peer(info_hash, SocketAddr::from(([127, 0, 1, i], 1)), now)
        }

        let sample = store
            .get_random_peers(&info_hash, AddressFamily::Ipv4, now)
            .unwrap();

        assert_eq!(sample.len(), MAX_VALUES);
    }

    #[test]
    fn peers_by_family() {
        let mut store = store(1, 10);
        let now = Instant::now();
        let info_hash = Id::random();

        store.add_peer(info_hash, "127.0.0.1:1".parse().unwrap(), now);
        store.add_peer(info_hash, "[2001:db8::1]:1".parse().unwrap(), now);

        assert_eq!(
            store.get_random_peers(&info_hash, AddressFamily::Ipv6, now),
            Some(vec!["[2001:db8::1]:1".parse().unwrap()])
        );
    }

    #[test]
    fn peers_expire() {
        let mut store = store(10, 10);
        let now = Instant::now();
        let info_hash = Id::random();

        store.add_peer(info_hash, SocketAddr::from(([127, 0, 1, 1], 1)), now);

        let later = now + DEFAULT_PEER_TTL;
        assert_eq!(
            store.get_random_peers(&info_hash, AddressFamily::Ipv4, later),
            None
        );

        store.expire(later);
        assert!(store.is_empty());
    }
}
