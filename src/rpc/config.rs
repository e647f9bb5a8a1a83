use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::common::{Id, SplitPolicy, DEFAULT_GOOD_NODE_WINDOW, DEFAULT_MAX_UNANSWERED_PINGS};

use super::search::DEFAULT_SEARCH_CONCURRENCY;
use super::server::{
    DEFAULT_BLACKLIST_DURATION, DEFAULT_BLACKLIST_THRESHOLD, DEFAULT_MAX_INFO_HASHES,
    DEFAULT_MAX_PEERS_PER_INFO_HASH, DEFAULT_MAX_REQUESTS_PER_SECOND, DEFAULT_MAX_REQUEST_BURST,
    DEFAULT_PEER_TTL, DEFAULT_TOKEN_ROTATION_INTERVAL,
};

/// Well known routers of the Mainline DHT.
pub const DEFAULT_BOOTSTRAP_NODES: [&str; 4] = [
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "dht.libtorrent.org:25401",
    "dht.anacrolix.link:42069",
];

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_BOOTSTRAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// Node Id, defaults to a random Id.
    pub id: Option<Id>,
    /// Addresses pinged with a find_node for our own Id while the routing table is empty.
    ///
    /// Defaults to empty, see [resolve_bootstrap] to use [DEFAULT_BOOTSTRAP_NODES].
    pub bootstrap: Vec<SocketAddr>,
    /// Explicit port to listen on, used by [crate::Dht::bind].
    ///
    /// Defaults to None
    pub port: Option<u16>,
    /// Also bind an IPv6 socket, used by [crate::Dht::bind].
    ///
    /// Defaults to false
    pub ipv6: bool,
    /// Request timeout duration.
    ///
    /// The longer this duration is, the longer searches take until they are done.
    /// The shorter this duration is, the more replies from busy nodes we miss out on.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Maximum number of requests in flight per search.
    ///
    /// Defaults to [DEFAULT_SEARCH_CONCURRENCY]
    pub search_concurrency: usize,
    /// Which full buckets may split.
    pub split_policy: SplitPolicy,
    /// A node that replied within this window is good.
    ///
    /// Defaults to [DEFAULT_GOOD_NODE_WINDOW]
    pub good_node_window: Duration,
    /// Consecutive unanswered requests after which a node is bad.
    ///
    /// Defaults to [DEFAULT_MAX_UNANSWERED_PINGS]
    pub max_unanswered_pings: u8,
    /// Minimum interval between two pings of the same dubious node.
    ///
    /// Defaults to [DEFAULT_PING_INTERVAL]
    pub ping_interval: Duration,
    /// Buckets unchanged for this long are refreshed with a find_node.
    ///
    /// Defaults to [DEFAULT_BUCKET_REFRESH_INTERVAL]
    pub bucket_refresh_interval: Duration,
    /// Defaults to [DEFAULT_TOKEN_ROTATION_INTERVAL]
    pub token_rotation_interval: Duration,
    /// Interval between bootstrap attempts while the routing table is empty.
    ///
    /// Defaults to [DEFAULT_BOOTSTRAP_INTERVAL]
    pub bootstrap_interval: Duration,
    /// Port announced for searches with `announce` set.
    ///
    /// Defaults to None, where the source port of our announce requests is used instead.
    pub announce_port: Option<u16>,
    /// Defaults to [DEFAULT_MAX_INFO_HASHES]
    pub max_info_hashes: usize,
    /// Defaults to [DEFAULT_MAX_PEERS_PER_INFO_HASH]
    pub max_peers_per_info_hash: usize,
    /// How long announced peers are handed out.
    ///
    /// Defaults to [DEFAULT_PEER_TTL]
    pub peer_ttl: Duration,
    /// Malformed datagrams from one IP before it is ignored.
    ///
    /// Defaults to [DEFAULT_BLACKLIST_THRESHOLD]
    pub blacklist_threshold: u32,
    /// Defaults to [DEFAULT_BLACKLIST_DURATION]
    pub blacklist_duration: Duration,
    /// Defaults to [DEFAULT_MAX_REQUESTS_PER_SECOND]
    pub max_requests_per_second: u32,
    /// Defaults to [DEFAULT_MAX_REQUEST_BURST]
    pub max_request_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            bootstrap: vec![],
            port: None,
            ipv6: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            search_concurrency: DEFAULT_SEARCH_CONCURRENCY,
            split_policy: SplitPolicy::default(),
            good_node_window: DEFAULT_GOOD_NODE_WINDOW,
            max_unanswered_pings: DEFAULT_MAX_UNANSWERED_PINGS,
            ping_interval: DEFAULT_PING_INTERVAL,
            bucket_refresh_interval: DEFAULT_BUCKET_REFRESH_INTERVAL,
            token_rotation_interval: DEFAULT_TOKEN_ROTATION_INTERVAL,
            bootstrap_interval: DEFAULT_BOOTSTRAP_INTERVAL,
            announce_port: None,
            max_info_hashes: DEFAULT_MAX_INFO_HASHES,
            max_peers_per_info_hash: DEFAULT_MAX_PEERS_PER_INFO_HASH,
            peer_ttl: DEFAULT_PEER_TTL,
            blacklist_threshold: DEFAULT_BLACKLIST_THRESHOLD,
            blacklist_duration: DEFAULT_BLACKLIST_DURATION,
            max_requests_per_second: DEFAULT_MAX_REQUESTS_PER_SECOND,
            max_request_burst: DEFAULT_MAX_REQUEST_BURST,
        }
    }
}

/// Resolve `host:port` strings, skipping the ones that fail to resolve.
///
/// Use with [DEFAULT_BOOTSTRAP_NODES] to join the Mainline DHT, this blocks on DNS.
pub fn resolve_bootstrap<S: AsRef<str>>(nodes: &[S]) -> Vec<SocketAddr> {
    let mut addresses = vec![];

    for node in nodes {
        match node.as_ref().to_socket_addrs() {
            Ok(resolved) => addresses.extend(resolved),
            Err(error) => debug!(node = node.as_ref(), ?error, "Could not resolve bootstrap node"),
        }
    }

    addresses
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_literals() {
        let addresses = resolve_bootstrap(&["127.0.0.1:6881", "[::1]:6882", "not an address"]);

        assert_eq!(
            addresses,
            vec![
                "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "[::1]:6882".parse().unwrap()
            ]
        );
    }
}
