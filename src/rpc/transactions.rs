//! Outstanding requests, matched against replies by transaction id and source address.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::common::{Id, RequestTypeSpecific};

use super::search::SearchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Ping,
    FindNode,
    GetPeers,
    AnnouncePeer,
}

impl From<&RequestTypeSpecific> for TransactionKind {
    fn from(request: &RequestTypeSpecific) -> Self {
        match request {
            RequestTypeSpecific::Ping => TransactionKind::Ping,
            RequestTypeSpecific::FindNode(_) => TransactionKind::FindNode,
            RequestTypeSpecific::GetPeers(_) => TransactionKind::GetPeers,
            RequestTypeSpecific::AnnouncePeer(_) => TransactionKind::AnnouncePeer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: u32,
    pub kind: TransactionKind,
    pub to: SocketAddr,
    /// Id of the node we expect to answer, if we know it.
    pub node_id: Option<Id>,
    pub sent_at: Instant,
    /// Search this request was sent for.
    pub search: Option<SearchId>,
}

impl Transaction {
    /// Returns `true` if a reply from `from` can answer this request.
    pub fn does_match(&self, from: &SocketAddr) -> bool {
        self.to.port() == from.port() && canonical_ip(&self.to) == canonical_ip(from)
    }
}

#[derive(Debug)]
/// Pending transactions keyed by their id.
pub struct Transactions {
    next_id: u32,
    pending: HashMap<u32, Transaction>,
}

impl Transactions {
    pub fn new() -> Self {
        Self {
            next_id: rand::thread_rng().gen(),
            pending: HashMap::new(),
        }
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, transaction_id: u32) -> bool {
        self.pending.contains_key(&transaction_id)
    }

    /// When the oldest pending transaction times out.
    pub fn next_expiry(&self, timeout: Duration) -> Option<Instant> {
        self.pending.values().map(|t| t.sent_at + timeout).min()
    }

    // === Public Methods ===

    /// Register a new outgoing request and return its transaction id.
    pub fn create(
        &mut self,
        kind: TransactionKind,
        to: SocketAddr,
        node_id: Option<Id>,
        search: Option<SearchId>,
        now: Instant,
    ) -> u32 {
        let mut id = self.next_id;
        while self.pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);

        self.pending.insert(
            id,
            Transaction {
                id,
                kind,
                to,
                node_id,
                sent_at: now,
                search,
            },
        );

        id
    }

    /// Resolve the transaction answered by a reply from `from`.
    ///
    /// A reply from any other address than the one the request was sent to
    /// leaves the transaction pending.
    pub fn resolve(&mut self, transaction_id: u32, from: &SocketAddr) -> Option<Transaction> {
        if !self.pending.get(&transaction_id)?.does_match(from) {
            return None;
        }

        self.pending.remove(&transaction_id)
    }

    /// Forget a transaction whose request could not be sent.
    pub fn remove(&mut self, transaction_id: u32) -> Option<Transaction> {
        self.pending.remove(&transaction_id)
    }

    /// Remove and return every transaction older than `timeout`, oldest first.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<Transaction> {
        let expired_ids: Vec<u32> = self
            .pending
            .values()
            .filter(|t| now.saturating_duration_since(t.sent_at) >= timeout)
            .map(|t| t.id)
            .collect();

        let mut expired: Vec<Transaction> = expired_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();

        expired.sort_by_key(|t| t.sent_at);
        expired
    }
}

impl Default for Transactions {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_ip(address: &SocketAddr) -> IpAddr {
    match address.ip() {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        ip => ip,
    }
}
