use std::net::SocketAddr;

use crate::common::{Id, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateStatus {
    /// Not queried yet.
    Fresh,
    /// Request in flight.
    Queried,
    Replied,
    /// Timed out or answered with an error.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub node: Node,
    pub status: CandidateStatus,
}

impl Candidate {
    pub fn is_live(&self) -> bool {
        self.status != CandidateStatus::Failed
    }
}

#[derive(Debug, Clone)]
/// Candidates of a search, ordered by distance to the target, unique by Id and bounded.
pub struct ClosestNodes {
    target: Id,
    capacity: usize,
    nodes: Vec<Candidate>,
}

impl ClosestNodes {
    pub fn new(target: Id, capacity: usize) -> Self {
        Self {
            target,
            capacity: capacity.max(1),
            nodes: Vec::with_capacity(capacity),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn nodes(&self) -> &[Candidate] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.nodes.iter().any(|candidate| &candidate.node.id == id)
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Candidate> {
        self.nodes.iter_mut().find(|candidate| &candidate.node.id == id)
    }

    // === Public Methods ===

    /// Insert a fresh candidate if it is closer than the farthest one kept,
    /// or if there is room. Returns `true` if it was inserted.
    pub fn add(&mut self, node: Node) -> bool {
        if self.contains(&node.id) {
            return false;
        }

        let seek = node.id.xor(&self.target);
        let position = self
            .nodes
            .partition_point(|probe| probe.node.id.xor(&self.target) < seek);

        if position >= self.capacity {
            return false;
        }

        self.nodes.insert(
            position,
            Candidate {
                node,
                status: CandidateStatus::Fresh,
            },
        );
        self.nodes.truncate(self.capacity);

        true
    }

    /// The closest candidate already queried, that has not failed.
    pub fn closest_visited(&self) -> Option<&Candidate> {
        self.nodes.iter().find(|c| {
            matches!(
                c.status,
                CandidateStatus::Queried | CandidateStatus::Replied
            )
        })
    }

    /// The `k` closest candidates that have not failed.
    pub fn live_closest(&self, k: usize) -> impl Iterator<Item = &Candidate> {
        self.nodes.iter().filter(|c| c.is_live()).take(k)
    }

    /// Mark the closest fresh candidate among the `k` closest live ones as queried.
    pub fn next_fresh(&mut self, k: usize) -> Option<Node> {
        let id = self
            .live_closest(k)
            .find(|c| c.status == CandidateStatus::Fresh)
            .map(|c| c.node.id)?;

        let candidate = self.get_mut(&id)?;
        candidate.status = CandidateStatus::Queried;

        Some(candidate.node.clone())
    }

    /// Record a reply from `id` at `from`, keeping its announce token.
    pub fn replied(&mut self, id: &Id, from: SocketAddr, token: Option<&[u8]>) {
        if let Some(candidate) = self.get_mut(id) {
            candidate.status = CandidateStatus::Replied;
            candidate.node.address = from;

            if let Some(token) = token {
                candidate.node.token = Some(token.into());
            }
        }
    }

    pub fn failed(&mut self, id: &Id) {
        if let Some(candidate) = self.get_mut(id) {
            candidate.status = CandidateStatus::Failed;
        }
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
