//! K-RPC implementation

mod closest_nodes;
pub mod config;
pub mod events;
mod maintenance;
mod search;
pub mod server;
mod transactions;
pub mod transport;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::common::{
    is_routable, transaction_id, AddressFamily, AnnouncePeerRequestArguments, ErrorSpecific,
    FindNodeRequestArguments, Id, KrpcCodec, Message, MessageCodec, MessageType, Node, NodeCounts,
    RequestSpecific, RequestTypeSpecific, RoutingTable, Seen, ERROR_METHOD_UNKNOWN,
};
use crate::{DecodeError, Error};

pub use closest_nodes::{Candidate, CandidateStatus, ClosestNodes};
pub use config::{resolve_bootstrap, Config, DEFAULT_BOOTSTRAP_NODES};
pub use events::{Event, EventHandler, NoopEvents};
pub use search::{Search, SearchId, SearchMode, SearchState, SEARCH_NODES};
pub use transactions::{Transaction, TransactionKind, Transactions};
pub use transport::{Transport, UdpTransport};

use maintenance::{Maintenance, MAX_PINGS_PER_TICK};
use server::{Outcome, Server};

/// Client version sent in the `v` field of every message.
pub const VERSION: &[u8; 4] = b"PD\0\x01";

/// Bounds of the duration returned by [Dht::tick].
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(50);
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(1);

const FAMILIES: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

#[derive(Debug)]
/// A DHT node driven by [Dht::tick] and [Dht::on_datagram].
///
/// Nothing happens in the background: the caller receives datagrams, feeds them to
/// [Dht::on_datagram], and calls [Dht::tick] again within the returned duration.
pub struct Dht<T: Transport, C: MessageCodec = KrpcCodec> {
    id: Id,
    config: Config,
    transport: T,
    codec: C,
    routing_table: RoutingTable,
    transactions: Transactions,
    searches: HashMap<SearchId, Search>,
    next_search_id: u64,
    server: Server,
    maintenance: Maintenance,
    events: Box<dyn EventHandler>,
}

impl Dht<UdpTransport> {
    /// Bind UDP sockets per [Config::port] and [Config::ipv6], speaking KRPC.
    pub fn bind(config: Config) -> Result<Self, Error> {
        let transport = UdpTransport::bind(config.port, config.ipv6)?;

        Ok(Self::new(config, transport, KrpcCodec))
    }
}

impl<T: Transport, C: MessageCodec> Dht<T, C> {
    pub fn new(config: Config, transport: T, codec: C) -> Self {
        let id = config.id.unwrap_or_else(Id::random);
        let now = Instant::now();

        let routing_table = RoutingTable::new(id)
            .with_split_policy(config.split_policy)
            .with_good_node_window(config.good_node_window)
            .with_max_unanswered_pings(config.max_unanswered_pings);

        info!(?id, "Starting DHT node");

        Self {
            id,
            server: Server::new(&config),
            config,
            transport,
            codec,
            routing_table,
            transactions: Transactions::new(),
            searches: HashMap::new(),
            next_search_id: 0,
            maintenance: Maintenance::new(now),
            events: Box::new(NoopEvents),
        }
    }

    /// Send search results to `events` instead of dropping them.
    pub fn with_events<E: EventHandler + 'static>(mut self, events: E) -> Self {
        self.events = Box::new(events);
        self
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Number of nodes in the routing table of `family`.
    pub fn routing_table_size(&self, family: AddressFamily) -> usize {
        self.routing_table.len(family)
    }

    pub fn node_counts(&self, family: AddressFamily) -> NodeCounts {
        self.routing_table.counts(family)
    }

    /// Good nodes of `family`, to restore later with [Dht::insert_node].
    pub fn good_nodes(&self, family: AddressFamily) -> Vec<Node> {
        self.routing_table.good_nodes(family)
    }

    pub fn transactions(&self) -> &Transactions {
        &self.transactions
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn active_searches(&self) -> impl Iterator<Item = &Search> {
        self.searches.values()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // === Public Methods ===

    /// Send a ping, the reply (if any) adds the node to the routing table.
    pub fn ping(&mut self, address: SocketAddr) -> Result<u32, Error> {
        self.send_request(address, None, RequestTypeSpecific::Ping, None, Instant::now())
    }

    /// Send an arbitrary request to a node, outside of any search.
    pub fn send(&mut self, node: &Node, request: RequestTypeSpecific) -> Result<u32, Error> {
        self.send_request(node.address, Some(node.id), request, None, Instant::now())
    }

    /// Add a node without contacting it, for example one saved from a previous session.
    ///
    /// It starts dubious and gets pinged by the maintenance.
    pub fn insert_node(&mut self, id: Id, address: SocketAddr) -> Result<(), Error> {
        if !is_routable(&address) {
            return Err(Error::Unreachable(address));
        }

        self.routing_table.note(id, address)
    }

    /// Send a find_node for our own Id to every bootstrap address, returns how many were sent.
    ///
    /// [Dht::tick] does this on its own while the routing table is empty.
    pub fn bootstrap(&mut self) -> usize {
        self.bootstrap_at(Instant::now())
    }

    /// Search for peers of `info_hash` among nodes of `family`, and announce
    /// ourselves to the closest ones once done if `announce` is set.
    ///
    /// Supersedes any active search for the same info hash and family.
    pub fn search(&mut self, info_hash: Id, family: AddressFamily, announce: bool) -> SearchId {
        self.search_at(info_hash, family, announce, Instant::now())
    }

    /// [Dht::search] with an explicit clock.
    pub fn search_at(
        &mut self,
        info_hash: Id,
        family: AddressFamily,
        announce: bool,
        now: Instant,
    ) -> SearchId {
        self.start_search(info_hash, family, SearchMode::GetPeers, announce, now)
    }

    /// Start an iterative `find_node` lookup for `target`.
    ///
    /// Replies only fill the routing table, no event is fired.
    pub fn find_node(&mut self, target: Id, family: AddressFamily) -> SearchId {
        self.find_node_at(target, family, Instant::now())
    }

    /// [Dht::find_node] with an explicit clock.
    pub fn find_node_at(&mut self, target: Id, family: AddressFamily, now: Instant) -> SearchId {
        self.start_search(target, family, SearchMode::FindNode, false, now)
    }

    /// Forget a search, its pending requests only refresh the routing table.
    ///
    /// Returns `false` if it was already done or unknown. No event is fired.
    pub fn cancel_search(&mut self, search_id: SearchId) -> bool {
        self.searches.remove(&search_id).is_some()
    }

    /// Expire requests, advance searches and maintain the routing table.
    ///
    /// Returns how long the caller may wait before calling it again.
    pub fn tick(&mut self) -> Duration {
        self.tick_at(Instant::now())
    }

    /// [Dht::tick] with an explicit clock.
    pub fn tick_at(&mut self, now: Instant) -> Duration {
        let request_timeout = self.config.request_timeout;

        // === Expire transactions ===
        for transaction in self.transactions.expire(now, request_timeout) {
            trace!(
                context = "request_timeout",
                transaction_id = transaction.id,
                to = ?transaction.to,
                kind = ?transaction.kind
            );

            if let Some(node_id) = transaction.node_id {
                self.routing_table.mark_unresponsive_at(
                    &node_id,
                    AddressFamily::of(&transaction.to),
                    now,
                );

                if let Some(search) = transaction
                    .search
                    .and_then(|search_id| self.searches.get_mut(&search_id))
                {
                    search.on_failure(&node_id);
                }
            }
        }

        // === Advance searches ===
        let mut search_ids: Vec<SearchId> = self.searches.keys().copied().collect();
        search_ids.sort();

        for search_id in search_ids {
            self.advance_search(search_id, now);
        }

        self.maintain(now);

        self.transactions
            .next_expiry(request_timeout)
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(MAX_TICK_INTERVAL)
            .clamp(MIN_TICK_INTERVAL, MAX_TICK_INTERVAL)
    }

    /// Handle a datagram received from `from`.
    ///
    /// Errors are never fatal, they are returned for logging.
    pub fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Result<(), Error> {
        self.on_datagram_at(bytes, from, Instant::now())
    }

    /// [Dht::on_datagram] with an explicit clock.
    pub fn on_datagram_at(
        &mut self,
        bytes: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Result<(), Error> {
        if self.server.blacklist.is_blacklisted(&from.ip(), now) {
            trace!(context = "socket_validation", ?from, "Blacklisted source");
            return Err(Error::Blacklisted(from.ip()));
        }

        if from.port() == 0 {
            trace!(context = "socket_validation", message = "Datagram from port 0");
            return Err(Error::Unreachable(from));
        }

        let message = match self.codec.decode(bytes) {
            Ok(message) => message,
            Err(DecodeError::UnknownMethod {
                transaction_id,
                method,
            }) => {
                debug!(?from, %method, "Unknown method");

                if !self.server.rate_limiter.try_acquire(now) {
                    return Err(Error::RateLimited);
                }

                return self.send_reply(
                    from,
                    transaction_id,
                    MessageType::Error(ErrorSpecific {
                        code: ERROR_METHOD_UNKNOWN,
                        description: "Method Unknown".to_string(),
                    }),
                );
            }
            Err(error) => {
                trace!(
                    context = "socket_error",
                    ?error,
                    ?from,
                    message = ?String::from_utf8_lossy(bytes),
                    "Received invalid Bencode message."
                );

                self.server.blacklist.strike(from.ip(), now);
                return Err(error.into());
            }
        };

        trace!(context = "socket_message_receiving", ?message, ?from);

        match message.message_type {
            MessageType::Request(request) => {
                self.handle_request(from, message.transaction_id, request, now)
            }
            MessageType::Response(_) | MessageType::Error(_) => {
                self.handle_reply(from, message, now)
            }
        }
    }

    // === Private Methods ===

    /// Families the transport can reach.
    fn families(&self) -> Vec<AddressFamily> {
        FAMILIES
            .into_iter()
            .filter(|family| self.transport.supports(*family))
            .collect()
    }

    fn send_request(
        &mut self,
        to: SocketAddr,
        node_id: Option<Id>,
        request: RequestTypeSpecific,
        search: Option<SearchId>,
        now: Instant,
    ) -> Result<u32, Error> {
        let family = AddressFamily::of(&to);

        if !is_routable(&to) || !self.transport.supports(family) {
            return Err(Error::Unreachable(to));
        }

        let kind = TransactionKind::from(&request);
        let tid = self.transactions.create(kind, to, node_id, search, now);

        let message = Message {
            transaction_id: tid.to_be_bytes().to_vec(),
            version: Some(VERSION.to_vec()),
            requester_ip: None,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: self.id,
                request_type: request,
            }),
        };

        trace!(context = "socket_message_sending", ?message, ?to);

        let sent = self
            .codec
            .encode(&message)
            .map_err(Error::from)
            .and_then(|bytes| Ok(self.transport.send_to(&bytes, to)?));

        if let Err(error) = sent {
            debug!(?error, ?to, "Error sending request message");
            self.transactions.remove(tid);

            return Err(error);
        }

        if let Some(node_id) = node_id {
            self.routing_table.mark_pinged(&node_id, family, now);
        }

        Ok(tid)
    }

    fn send_reply(
        &mut self,
        to: SocketAddr,
        transaction_id: Vec<u8>,
        message_type: MessageType,
    ) -> Result<(), Error> {
        let message = Message {
            transaction_id,
            version: Some(VERSION.to_vec()),
            requester_ip: Some(to),
            message_type,
        };

        trace!(context = "socket_message_sending", ?message, ?to);

        let bytes = self.codec.encode(&message)?;
        self.transport.send_to(&bytes, to)?;

        Ok(())
    }

    fn handle_request(
        &mut self,
        from: SocketAddr,
        transaction_id: Vec<u8>,
        request: RequestSpecific,
        now: Instant,
    ) -> Result<(), Error> {
        if request.requester_id == self.id {
            trace!(context = "socket_validation", ?from, "Request from our own Id");
            return Ok(());
        }

        if !self.server.rate_limiter.try_acquire(now) {
            trace!(context = "socket_validation", ?from, "Rate limited request");
            return Err(Error::RateLimited);
        }

        // Full buckets keep their healthy nodes.
        let _ = self
            .routing_table
            .insert_at(request.requester_id, from, Seen::Request, now);

        match self
            .server
            .handle_request(self.id, &self.routing_table, from, &request, now)
        {
            Outcome::Answer(response) => {
                self.send_reply(from, transaction_id, MessageType::Response(response))
            }
            Outcome::Reject { error, reason } => {
                self.send_reply(from, transaction_id, MessageType::Error(error))?;

                Err(reason)
            }
        }
    }

    fn handle_reply(
        &mut self,
        from: SocketAddr,
        message: Message,
        now: Instant,
    ) -> Result<(), Error> {
        let tid = transaction_id(&message.transaction_id)?;

        let transaction = self.transactions.resolve(tid, &from).ok_or_else(|| {
            trace!(
                context = "socket_validation",
                message = "Response from wrong address or for an unknown transaction",
                transaction_id = tid,
                ?from
            );

            Error::UnknownTransaction {
                transaction_id: tid,
                from,
            }
        })?;

        if let MessageType::Error(ErrorSpecific { code, description }) = &message.message_type {
            debug!(?from, code, %description, kind = ?transaction.kind, "Error reply");

            self.fail_search_request(&transaction, now);
            return Ok(());
        }

        let Some(responder_id) = message.get_author_id() else {
            trace!(context = "socket_validation", ?from, "Reply without an Id");

            self.fail_search_request(&transaction, now);
            return Ok(());
        };

        if responder_id == self.id {
            trace!(context = "socket_validation", ?from, "Reply from our own Id");

            self.fail_search_request(&transaction, now);
            return Ok(());
        }

        if let Some(expected) = transaction.node_id.filter(|expected| expected != &responder_id) {
            debug!(?expected, ?responder_id, ?from, "Reply from a different Id than expected");
        }

        let _ = self
            .routing_table
            .insert_at(responder_id, from, Seen::Reply, now);

        let own_id = self.id;
        let families = self.families();
        let closer_nodes: Vec<Node> = message
            .get_closer_nodes()
            .unwrap_or_default()
            .iter()
            .filter(|node| node.id != own_id && is_routable(&node.address))
            .filter(|node| families.contains(&node.family()))
            .cloned()
            .collect();

        for node in &closer_nodes {
            let _ = self
                .routing_table
                .insert_at(node.id, node.address, Seen::Hearsay, now);
        }

        let Some(search_id) = transaction.search else {
            return Ok(());
        };
        let Some(search) = self.searches.get_mut(&search_id) else {
            trace!(%search_id, "Reply for a search that is gone");
            return Ok(());
        };

        let candidate_id = transaction.node_id.unwrap_or(responder_id);
        search.on_reply(&candidate_id, from, &closer_nodes, message.get_token());

        let family = search.family();
        let values: Vec<SocketAddr> = message
            .get_values()
            .unwrap_or_default()
            .iter()
            .filter(|peer| AddressFamily::of(peer) == family && is_routable(peer))
            .copied()
            .collect();
        let peers = search.new_peers(&values);

        if !peers.is_empty() && search.mode() == SearchMode::GetPeers {
            self.events.on_reply_values(search.target(), family, &peers);
        }

        self.advance_search(search_id, now);

        Ok(())
    }

    /// A resolved request of a search got no usable reply, move the search along without it.
    fn fail_search_request(&mut self, transaction: &Transaction, now: Instant) {
        let (Some(search_id), Some(node_id)) = (transaction.search, transaction.node_id) else {
            return;
        };

        if let Some(search) = self.searches.get_mut(&search_id) {
            search.on_failure(&node_id);
        }
        self.advance_search(search_id, now);
    }

    fn start_search(
        &mut self,
        target: Id,
        family: AddressFamily,
        mode: SearchMode,
        announce: bool,
        now: Instant,
    ) -> SearchId {
        if let Some(superseded) = self
            .searches
            .values()
            .find(|search| search.target() == target && search.family() == family)
            .map(Search::id)
        {
            debug!(%superseded, ?target, ?family, "Superseding search");
            self.searches.remove(&superseded);
        }

        let search_id = SearchId(self.next_search_id);
        self.next_search_id += 1;

        let mut search = Search::new(
            search_id,
            target,
            family,
            mode,
            announce,
            self.config.search_concurrency,
        );

        for node in self.routing_table.closest_nodes(&target, family, SEARCH_NODES) {
            search.add_candidate(node);
        }

        self.searches.insert(search_id, search);
        // Even without seeds, completion waits for the next tick.
        self.send_search_requests(search_id, now);

        search_id
    }

    /// Send requests up to the concurrency bound, and finish the search if nothing is left.
    fn advance_search(&mut self, search_id: SearchId, now: Instant) {
        self.send_search_requests(search_id, now);

        let done = self
            .searches
            .get_mut(&search_id)
            .map(Search::is_done)
            .unwrap_or(false);

        if done {
            self.finish_search(search_id, now);
        }
    }

    fn send_search_requests(&mut self, search_id: SearchId, now: Instant) {
        loop {
            let Some(search) = self.searches.get_mut(&search_id) else {
                return;
            };

            let request = search.request();
            let nodes = search.next_requests();

            if nodes.is_empty() {
                break;
            }

            for node in nodes {
                if let Err(error) = self.send_request(
                    node.address,
                    Some(node.id),
                    request.clone(),
                    Some(search_id),
                    now,
                ) {
                    debug!(%search_id, ?error, node = ?node.id, "Could not query candidate");

                    if let Some(search) = self.searches.get_mut(&search_id) {
                        search.on_failure(&node.id);
                    }
                }
            }
        }
    }

    fn finish_search(&mut self, search_id: SearchId, now: Instant) {
        let Some(search) = self.searches.remove(&search_id) else {
            return;
        };

        let target = search.target();
        let family = search.family();

        match search.mode() {
            SearchMode::FindNode => {
                info!(
                    ?family,
                    table_size = self.routing_table.len(family),
                    "Populated the routing table"
                );
            }
            SearchMode::GetPeers => {
                debug!(
                    %search_id,
                    ?target,
                    ?family,
                    peers = search.peers_found(),
                    "Search done"
                );

                self.events.on_search_done(target, family);

                if search.announce() {
                    self.announce(&search, now);
                }
            }
        }
    }

    fn announce(&mut self, search: &Search, now: Instant) {
        let (port, implied_port) = match self.config.announce_port {
            Some(port) => (port, false),
            None => (0, true),
        };

        for node in search.announce_targets() {
            let Some(token) = node.token.as_deref() else {
                continue;
            };

            let request = RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                info_hash: search.target(),
                port,
                implied_port,
                token: token.to_vec(),
            });

            if let Err(error) = self.send_request(node.address, Some(node.id), request, None, now) {
                debug!(?error, node = ?node.id, "Could not announce");
            }
        }
    }

    fn bootstrap_at(&mut self, now: Instant) -> usize {
        let mut sent = 0;

        for address in self.config.bootstrap.clone() {
            let request = RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                target: self.id,
                want: vec![],
            });

            match self.send_request(address, None, request, None, now) {
                Ok(_) => sent += 1,
                Err(error) => debug!(?address, ?error, "Could not contact bootstrap node"),
            }
        }

        if sent > 0 {
            info!(sent, "Bootstrapping");
        }

        sent
    }

    fn maintain(&mut self, now: Instant) {
        if self
            .server
            .tokens
            .should_update(self.config.token_rotation_interval, now)
        {
            self.server.tokens.rotate_at(now);
        }

        self.routing_table.age_at(now);

        let families = self.families();
        let decisions = self.maintenance.decisions_at(
            now,
            &self.routing_table,
            &families,
            self.config.bootstrap_interval,
        );

        if decisions.should_expire {
            self.server.peers.expire(now);
            self.server.blacklist.expire(now);
        }

        if decisions.should_bootstrap {
            self.bootstrap_at(now);
        }

        for family in decisions.self_lookups {
            self.start_search(self.id, family, SearchMode::FindNode, false, now);
        }

        for family in families {
            let refresh = self.routing_table.refresh_targets(
                family,
                now,
                self.config.bucket_refresh_interval,
            );

            for (target, node) in refresh {
                let Some(node) = node else {
                    continue;
                };

                trace!(?target, node = ?node.id, "Refreshing bucket");

                let request = RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                    target,
                    want: vec![],
                });
                let sent = self.send_request(node.address, Some(node.id), request, None, now);
                if let Err(error) = sent {
                    debug!(?error, node = ?node.id, "Could not refresh bucket");
                }
            }

            let dubious = self
                .routing_table
                .dubious_to_ping(family, now, self.config.ping_interval);

            for node in dubious.into_iter().take(MAX_PINGS_PER_TICK) {
                if let Err(error) = self.send_request(
                    node.address,
                    Some(node.id),
                    RequestTypeSpecific::Ping,
                    None,
                    now,
                ) {
                    debug!(?error, node = ?node.id, "Could not ping dubious node");
                }
            }
        }
    }
}
