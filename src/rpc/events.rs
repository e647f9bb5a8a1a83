//! Search results surfaced to the caller.
use std::fmt::Debug;
use std::net::SocketAddr;

use flume::Sender;

use crate::common::{AddressFamily, Id};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// New peers for an info hash, each peer is reported at most once per search.
    Values {
        info_hash: Id,
        family: AddressFamily,
        peers: Vec<SocketAddr>,
    },
    /// A get_peers search finished, after all of its [Event::Values].
    SearchDone { info_hash: Id, family: AddressFamily },
}

/// Receives search results synchronously, from within [crate::Dht::tick] or [crate::Dht::on_datagram].
pub trait EventHandler: Debug {
    fn on_reply_values(&mut self, info_hash: Id, family: AddressFamily, peers: &[SocketAddr]);

    fn on_search_done(&mut self, info_hash: Id, family: AddressFamily);
}

impl EventHandler for Sender<Event> {
    fn on_reply_values(&mut self, info_hash: Id, family: AddressFamily, peers: &[SocketAddr]) {
        // Receiver dropped, nobody is listening anymore.
        let _ = self.send(Event::Values {
            info_hash,
            family,
            peers: peers.to_vec(),
        });
    }

    fn on_search_done(&mut self, info_hash: Id, family: AddressFamily) {
        let _ = self.send(Event::SearchDone { info_hash, family });
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Drops every event.
pub struct NoopEvents;

impl EventHandler for NoopEvents {
    fn on_reply_values(&mut self, _: Id, _: AddressFamily, _: &[SocketAddr]) {}

    fn on_search_done(&mut self, _: Id, _: AddressFamily) {}
}
