//! Answering incoming requests, and the state that needs.

mod blacklist;
mod peers;
mod rate_limit;
mod tokens;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Instant;

use tracing::debug;

use crate::common::{
    AddressFamily, AnnouncePeerRequestArguments, ErrorSpecific, FindNodeRequestArguments,
    FindNodeResponseArguments, GetPeersRequestArguments, GetPeersResponseArguments, Id, Node,
    PingResponseArguments, RequestSpecific, RequestTypeSpecific, ResponseSpecific, RoutingTable,
    ERROR_PROTOCOL, MAX_BUCKET_SIZE_K,
};
use crate::Error;

use super::config::Config;

pub use blacklist::*;
pub use peers::*;
pub use rate_limit::*;
pub use tokens::*;

#[derive(Debug)]
/// How a request was handled.
pub(crate) enum Outcome {
    Answer(ResponseSpecific),
    /// Answered with an error message, and reported to the caller.
    Reject { error: ErrorSpecific, reason: Error },
}

#[derive(Debug)]
/// State kept to answer requests: announce tokens, announced peers and abuse limits.
pub struct Server {
    pub(crate) tokens: Tokens,
    pub(crate) peers: PeersStore,
    pub(crate) blacklist: Blacklist,
    pub(crate) rate_limiter: RequestLimiter,
}

impl Server {
    pub fn new(config: &Config) -> Self {
        Self {
            tokens: Tokens::new(),
            peers: PeersStore::new(
                NonZeroUsize::new(config.max_info_hashes).unwrap_or(NonZeroUsize::MIN),
                NonZeroUsize::new(config.max_peers_per_info_hash).unwrap_or(NonZeroUsize::MIN),
                config.peer_ttl,
            ),
            blacklist: Blacklist::new(config.blacklist_threshold, config.blacklist_duration),
            rate_limiter: RequestLimiter::new(
                config.max_requests_per_second,
                config.max_request_burst,
            ),
        }
    }

    // === Getters ===

    pub fn tokens(&self) -> &Tokens {
        &self.tokens
    }

    pub fn peers(&self) -> &PeersStore {
        &self.peers
    }

    // === Crate Methods ===

    /// Answer a request from `from`, the sender was already recorded in the routing table.
    pub(crate) fn handle_request(
        &mut self,
        id: Id,
        routing_table: &RoutingTable,
        from: SocketAddr,
        request: &RequestSpecific,
        now: Instant,
    ) -> Outcome {
        let requester_id = request.requester_id;

        match &request.request_type {
            RequestTypeSpecific::Ping => {
                Outcome::Answer(ResponseSpecific::Ping(PingResponseArguments {
                    responder_id: id,
                }))
            }
            RequestTypeSpecific::FindNode(FindNodeRequestArguments { target, want }) => {
                Outcome::Answer(ResponseSpecific::FindNode(FindNodeResponseArguments {
                    responder_id: id,
                    nodes: closest_wanted(routing_table, target, want, from),
                }))
            }
            RequestTypeSpecific::GetPeers(GetPeersRequestArguments { info_hash, want }) => {
                let values = self
                    .peers
                    .get_random_peers(info_hash, AddressFamily::of(&from), now)
                    .unwrap_or_default();

                Outcome::Answer(ResponseSpecific::GetPeers(GetPeersResponseArguments {
                    responder_id: id,
                    token: self.tokens.issue(from).to_vec(),
                    values,
                    nodes: closest_wanted(routing_table, info_hash, want, from),
                }))
            }
            RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                info_hash,
                port,
                implied_port,
                token,
            }) => {
                if !self.tokens.validate(from, token) {
                    debug!(
                        ?info_hash,
                        ?requester_id,
                        ?from,
                        ?token,
                        request_type = "announce_peer",
                        "Invalid token"
                    );

                    return Outcome::Reject {
                        error: ErrorSpecific {
                            code: ERROR_PROTOCOL,
                            description: "Bad token".to_string(),
                        },
                        reason: Error::InvalidToken(from),
                    };
                }

                let peer = if *implied_port {
                    from
                } else {
                    SocketAddr::new(from.ip(), *port)
                };

                if peer.port() == 0 {
                    return Outcome::Reject {
                        error: ErrorSpecific {
                            code: ERROR_PROTOCOL,
                            description: "Announce with forbidden port number".to_string(),
                        },
                        reason: Error::Unreachable(peer),
                    };
                }

                self.peers.add_peer(*info_hash, peer, now);

                Outcome::Answer(ResponseSpecific::Ping(PingResponseArguments {
                    responder_id: id,
                }))
            }
        }
    }
}

/// Closest nodes of every wanted family, or of the requester's family if it wants none.
fn closest_wanted(
    routing_table: &RoutingTable,
    target: &Id,
    want: &[AddressFamily],
    from: SocketAddr,
) -> Vec<Node> {
    let requester_family = [AddressFamily::of(&from)];
    let families = if want.is_empty() {
        &requester_family[..]
    } else {
        want
    };

    families
        .iter()
        .flat_map(|family| routing_table.closest_nodes(target, *family, MAX_BUCKET_SIZE_K))
        .collect()
}
