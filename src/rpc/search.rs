//! Iterative searches for nodes close to a target, or for peers of an info hash.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;

use tracing::trace;

use super::closest_nodes::{CandidateStatus, ClosestNodes};
use crate::common::{
    AddressFamily, FindNodeRequestArguments, GetPeersRequestArguments, Id, Node,
    RequestTypeSpecific, MAX_BUCKET_SIZE_K,
};

/// Number of candidates a search keeps, and seeds from the routing table.
pub const SEARCH_NODES: usize = 14;
/// Default number of requests a search keeps in flight.
pub const DEFAULT_SEARCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Handle of a search, stays unique for the lifetime of a [crate::Dht].
pub struct SearchId(pub(crate) u64);

impl Display for SearchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "search-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Only look for the closest nodes, used to fill the routing table.
    FindNode,
    /// Collect peers along the way, and surface them to the caller.
    GetPeers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Active,
    Done,
}

/// An iterative process of concurrently sending a request to the closest known nodes to
/// the target, adding closer nodes discovered in the responses, and
/// repeating this process until the closest live nodes have all been queried.
#[derive(Debug)]
pub struct Search {
    id: SearchId,
    family: AddressFamily,
    mode: SearchMode,
    announce: bool,
    candidates: ClosestNodes,
    visited: HashSet<Id>,
    in_flight: usize,
    concurrency: usize,
    state: SearchState,
    peers: HashSet<SocketAddr>,
}

impl Search {
    pub fn new(
        id: SearchId,
        target: Id,
        family: AddressFamily,
        mode: SearchMode,
        announce: bool,
        concurrency: usize,
    ) -> Self {
        trace!(%id, ?target, ?family, ?mode, "New search");

        Self {
            id,
            family,
            mode,
            announce,
            candidates: ClosestNodes::new(target, SEARCH_NODES),
            visited: HashSet::new(),
            in_flight: 0,
            concurrency: concurrency.max(1),
            state: SearchState::Active,
            peers: HashSet::new(),
        }
    }

    // === Getters ===

    pub fn id(&self) -> SearchId {
        self.id
    }

    pub fn target(&self) -> Id {
        self.candidates.target()
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn announce(&self) -> bool {
        self.announce
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn candidates(&self) -> &ClosestNodes {
        &self.candidates
    }

    /// Number of distinct peers found so far.
    pub fn peers_found(&self) -> usize {
        self.peers.len()
    }

    /// The request this search sends to every candidate.
    pub fn request(&self) -> RequestTypeSpecific {
        match self.mode {
            SearchMode::FindNode => RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                target: self.target(),
                want: vec![],
            }),
            SearchMode::GetPeers => RequestTypeSpecific::GetPeers(GetPeersRequestArguments {
                info_hash: self.target(),
                want: vec![],
            }),
        }
    }

    // === Public Methods ===

    /// Add a contact of this search's family as a candidate, unless already known.
    pub fn add_candidate(&mut self, node: Node) -> bool {
        if node.family() != self.family || self.visited.contains(&node.id) {
            return false;
        }

        self.candidates.add(node)
    }

    /// Pick the next candidates to query, marking them visited and counting them in flight.
    pub fn next_requests(&mut self) -> Vec<Node> {
        let mut nodes = vec![];

        if self.state == SearchState::Done {
            return nodes;
        }

        while self.in_flight < self.concurrency {
            match self.candidates.next_fresh(MAX_BUCKET_SIZE_K) {
                Some(node) => {
                    self.visited.insert(node.id);
                    self.in_flight += 1;
                    nodes.push(node);
                }
                None => break,
            }
        }

        nodes
    }

    /// Handle a reply from a queried candidate.
    ///
    /// Only the returned contacts closer to the target than the closest visited
    /// candidate are merged, farther ones are discarded.
    pub fn on_reply(
        &mut self,
        responder: &Id,
        from: SocketAddr,
        nodes: &[Node],
        token: Option<&[u8]>,
    ) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.candidates.replied(responder, from, token);

        let target = self.target();
        let frontier = self
            .candidates
            .closest_visited()
            .map(|c| c.node.id.xor(&target));

        for node in nodes {
            if frontier.is_some_and(|frontier| node.id.xor(&target) >= frontier) {
                continue;
            }

            self.add_candidate(node.clone());
        }
    }

    /// Handle a timeout or an error reply from a queried candidate, it is not retried.
    pub fn on_failure(&mut self, id: &Id) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.candidates.failed(id);
    }

    /// Keep only peers not surfaced before.
    pub fn new_peers(&mut self, values: &[SocketAddr]) -> Vec<SocketAddr> {
        values
            .iter()
            .filter(|peer| self.peers.insert(**peer))
            .copied()
            .collect()
    }

    /// Check for completion: nothing in flight and the closest live candidates all visited.
    pub fn is_done(&mut self) -> bool {
        if self.state == SearchState::Active
            && self.in_flight == 0
            && self
                .candidates
                .live_closest(MAX_BUCKET_SIZE_K)
                .all(|c| c.status != CandidateStatus::Fresh)
        {
            self.state = SearchState::Done;
        }

        self.state == SearchState::Done
    }

    /// The closest responders that gave us a token, to announce to.
    pub fn announce_targets(&self) -> Vec<Node> {
        self.candidates
            .nodes()
            .iter()
            .filter(|c| c.status == CandidateStatus::Replied && c.node.token.is_some())
            .take(MAX_BUCKET_SIZE_K)
            .map(|c| c.node.clone())
            .collect()
    }
}
