mod common;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use peerdht::messages::RequestTypeSpecific;
use peerdht::{AddressFamily, Error, Event, Id, Node, Quality};

use common::Sim;

const STEP: Duration = Duration::from_millis(500);

fn peers_of(events: &[Event], info_hash: Id) -> HashSet<SocketAddr> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Values {
                info_hash: hash,
                peers,
                ..
            } if *hash == info_hash => Some(peers.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn bootstrap_fills_routing_tables() {
    let sim = Sim::bootstrapped(30);

    for (index, node) in sim.nodes.iter().enumerate() {
        let size = node.dht.routing_table_size(AddressFamily::Ipv4);
        assert!(size >= 8, "node {index} only knows {size} nodes");
        assert_eq!(node.dht.routing_table_size(AddressFamily::Ipv6), 0);
    }

    // Dubious nodes got pinged and answered.
    let counts = sim.node(0).node_counts(AddressFamily::Ipv4);
    assert!(counts.good >= 8);
    assert_eq!(counts.bad, 0);
}

#[test]
fn announce_then_find_peers() {
    let mut sim = Sim::bootstrapped(25);
    let info_hash = Id::random();
    let now = sim.now;

    sim.node_mut(3).search_at(info_hash, AddressFamily::Ipv4, true, now);
    sim.deliver();

    let events = sim.events(3);
    assert_eq!(
        events.last(),
        Some(&Event::SearchDone {
            info_hash,
            family: AddressFamily::Ipv4
        })
    );
    assert!(peers_of(&events, info_hash).is_empty());

    // Announces were stored with our source port.
    let stored = sim
        .nodes
        .iter()
        .filter(|node| !node.dht.server().peers().is_empty())
        .count();
    assert!(stored > 0 && stored <= 8, "stored at {stored} nodes");

    sim.node_mut(17).search_at(info_hash, AddressFamily::Ipv4, false, now);
    sim.deliver();

    let events = sim.events(17);
    assert!(peers_of(&events, info_hash).contains(&Sim::address(3)));
    assert!(matches!(events.last(), Some(Event::SearchDone { .. })));
}

#[test]
fn values_are_reported_once_and_before_done() {
    let mut sim = Sim::bootstrapped(20);
    let info_hash = Id::random();
    let now = sim.now;

    for announcer in [1, 2] {
        sim.node_mut(announcer)
            .search_at(info_hash, AddressFamily::Ipv4, true, now);
        sim.deliver();
    }

    sim.node_mut(9)
        .search_at(info_hash, AddressFamily::Ipv4, false, now);
    sim.deliver();

    let events = sim.events(9);
    let done = events
        .iter()
        .position(|event| matches!(event, Event::SearchDone { .. }))
        .unwrap();
    assert_eq!(done, events.len() - 1);

    let reported: Vec<SocketAddr> = events
        .iter()
        .filter_map(|event| match event {
            Event::Values { peers, .. } => Some(peers.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    let unique: HashSet<SocketAddr> = reported.iter().copied().collect();

    assert_eq!(reported.len(), unique.len());
    assert_eq!(
        unique,
        HashSet::from([Sim::address(1), Sim::address(2)])
    );
}

#[test]
fn search_concurrency_is_bounded() {
    let mut sim = Sim::bootstrapped(30);
    let now = sim.now;

    sim.node_mut(5)
        .search_at(Id::random(), AddressFamily::Ipv4, false, now);

    // Nothing delivered yet, only the first round is in flight.
    let search = sim.node(5).active_searches().next().unwrap();
    assert!(search.in_flight() <= sim.node(5).config().search_concurrency);
    assert!(search.in_flight() > 0);
    assert_eq!(sim.node(5).transactions().len(), search.in_flight());
}

#[test]
fn newer_search_supersedes() {
    let mut sim = Sim::bootstrapped(15);
    let info_hash = Id::random();
    let now = sim.now;

    let first = sim
        .node_mut(4)
        .search_at(info_hash, AddressFamily::Ipv4, false, now);
    let second = sim
        .node_mut(4)
        .search_at(info_hash, AddressFamily::Ipv4, false, now);

    assert_ne!(first, second);
    let active: Vec<_> = sim.node(4).active_searches().map(|s| s.id()).collect();
    assert_eq!(active, vec![second]);

    // Replies to the first search only refresh the routing table.
    sim.deliver();
    let done = sim
        .events(4)
        .into_iter()
        .filter(|event| matches!(event, Event::SearchDone { .. }))
        .count();
    assert_eq!(done, 1);
}

#[test]
fn cancelled_search_fires_no_event() {
    let mut sim = Sim::bootstrapped(15);
    let now = sim.now;

    let search_id = sim
        .node_mut(2)
        .search_at(Id::random(), AddressFamily::Ipv4, false, now);
    assert!(sim.node_mut(2).cancel_search(search_id));
    assert!(!sim.node_mut(2).cancel_search(search_id));

    sim.deliver();

    assert!(sim.events(2).is_empty());
    assert_eq!(sim.node(2).active_searches().count(), 0);
}

#[test]
fn search_completes_despite_offline_nodes() {
    let mut sim = Sim::bootstrapped(20);
    let info_hash = Id::random();

    for index in [6, 7, 8, 9] {
        sim.network.set_offline(Sim::address(index), true);
    }

    let now = sim.now;
    sim.node_mut(0)
        .search_at(info_hash, AddressFamily::Ipv4, false, now);
    sim.deliver();

    // Offline candidates time out on the next ticks.
    for _ in 0..20 {
        sim.step(STEP);
    }

    assert_eq!(
        sim.events(0).last(),
        Some(&Event::SearchDone {
            info_hash,
            family: AddressFamily::Ipv4
        })
    );
    assert_eq!(sim.node(0).active_searches().count(), 0);
}

#[test]
fn unresponsive_node_turns_bad() {
    let mut sim = Sim::bootstrapped(10);
    let gone = Sim::address(4);
    let gone_id = sim.id(4);

    assert!(sim
        .node(0)
        .routing_table()
        .contains(AddressFamily::Ipv4, &gone_id));

    sim.network.set_offline(gone, true);

    let timeout = sim.node(0).config().request_timeout;
    let max_unanswered = sim.node(0).config().max_unanswered_pings;

    for _ in 0..max_unanswered {
        sim.node_mut(0)
            .send(&Node::new(gone_id, gone), RequestTypeSpecific::Ping)
            .unwrap();
        sim.run(timeout + STEP, STEP);
    }

    let quality = sim
        .node(0)
        .routing_table()
        .get(AddressFamily::Ipv4, &gone_id)
        .map(|entry| entry.quality());

    // Either still there as bad, or replaced by a candidate.
    assert!(matches!(quality, None | Some(Quality::Bad)));
    assert!(sim
        .node(0)
        .routing_table()
        .closest(&gone_id, AddressFamily::Ipv4, 20)
        .iter()
        .all(|entry| entry.id() != &gone_id));
}

#[test]
fn late_reply_is_unknown_transaction() {
    let mut sim = Sim::bootstrapped(5);
    let target = Sim::address(1);

    let tid = sim.node_mut(0).ping(target).unwrap();

    // Expire the request before the reply is delivered.
    sim.now += sim.node(0).config().request_timeout;
    let now = sim.now;
    sim.node_mut(0).tick_at(now);
    assert!(!sim.node(0).transactions().contains(tid));

    sim.errors.clear();
    sim.deliver();

    assert!(sim.errors.iter().any(|(index, error)| *index == 0
        && matches!(
            error,
            Error::UnknownTransaction { transaction_id, from }
                if *transaction_id == tid && *from == target
        )));
}

#[test]
fn spoofed_reply_is_unknown_transaction() {
    let mut sim = Sim::bootstrapped(5);
    let target = Sim::address(1);
    let spoofer = Sim::address(2);

    let tid = sim.node_mut(0).ping(target).unwrap();

    // Same transaction id, but coming from another address.
    let reply = peerdht::Message {
        transaction_id: tid.to_be_bytes().to_vec(),
        version: None,
        requester_ip: None,
        message_type: peerdht::messages::MessageType::Response(
            peerdht::messages::ResponseSpecific::Ping(peerdht::messages::PingResponseArguments {
                responder_id: sim.id(2),
            }),
        ),
    };
    sim.network
        .inject(&reply.to_bytes().unwrap(), spoofer, Sim::address(0));

    sim.errors.clear();
    sim.deliver_wave();

    assert!(sim.errors.iter().any(|(index, error)| *index == 0
        && matches!(error, Error::UnknownTransaction { from, .. } if *from == spoofer)));

    // The genuine reply still resolves it.
    sim.deliver();
    assert!(!sim.node(0).transactions().contains(tid));
}

#[test]
fn malformed_datagrams_blacklist_the_source() {
    let mut sim = Sim::bootstrapped(3);
    let attacker: SocketAddr = "192.0.2.1:6881".parse().unwrap();
    let threshold = sim.node(0).config().blacklist_threshold;

    for _ in 0..threshold {
        sim.network.inject(b"not bencode", attacker, Sim::address(0));
    }
    sim.network.inject(
        b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe",
        attacker,
        Sim::address(0),
    );

    sim.errors.clear();
    sim.deliver();

    let decode_errors = sim
        .errors
        .iter()
        .filter(|(_, error)| matches!(error, Error::Decode(_)))
        .count();
    assert_eq!(decode_errors, threshold as usize);
    assert!(matches!(sim.errors.last(), Some((0, Error::Blacklisted(_)))));
}
