mod common;

use std::collections::HashSet;

use peerdht::rpc::CandidateStatus;
use peerdht::{AddressFamily, Event, Id};

use common::Sim;

#[test]
fn get_peers_converges_in_few_rounds() {
    let mut sim = Sim::bootstrapped(21);
    let info_hash: Id = "f919bc3c68eed436c485a564c51984a35af9151c".parse().unwrap();
    let now = sim.now;

    sim.node_mut(0)
        .search_at(info_hash, AddressFamily::Ipv4, false, now);

    let mut waves = 0;
    let mut done = false;

    while !done && waves < 100 {
        if let Some(search) = sim.node(0).active_searches().next() {
            let nodes = search.candidates().nodes();
            let unique: HashSet<Id> = nodes.iter().map(|candidate| candidate.node.id).collect();
            assert_eq!(unique.len(), nodes.len());

            // Ordered by distance to the target.
            assert!(nodes
                .windows(2)
                .all(|pair| pair[0].node.id.xor(&info_hash) < pair[1].node.id.xor(&info_hash)));
        }

        if sim.deliver_wave() == 0 {
            break;
        }
        waves += 1;

        done = sim
            .events(0)
            .iter()
            .any(|event| matches!(event, Event::SearchDone { .. }));
    }

    assert!(done, "search did not finish after {waves} waves");

    // A round is a request wave followed by a reply wave.
    let rounds = waves / 2;
    assert!(rounds <= 5, "took {rounds} rounds");
}

#[test]
fn find_node_reaches_the_closest_node() {
    let mut sim = Sim::bootstrapped(21);
    let target = Id::random();
    let now = sim.now;

    let closest = (1..21)
        .map(|index| sim.id(index))
        .min_by_key(|id| id.xor(&target))
        .unwrap();

    let search_id = sim.node_mut(0).find_node_at(target, AddressFamily::Ipv4, now);

    // Every node is online, so each queried candidate ends up replying.
    let mut queried = HashSet::new();
    for _ in 0..20 {
        if let Some(search) = sim
            .node(0)
            .active_searches()
            .find(|search| search.id() == search_id)
        {
            queried.extend(
                search
                    .candidates()
                    .nodes()
                    .iter()
                    .filter(|candidate| {
                        matches!(
                            candidate.status,
                            CandidateStatus::Queried | CandidateStatus::Replied
                        )
                    })
                    .map(|candidate| candidate.node.id),
            );
        }

        if sim.deliver_wave() == 0 {
            break;
        }
    }

    assert!(queried.contains(&closest));
    assert_eq!(sim.node(0).active_searches().count(), 0);
    // Node lookups report nothing to the event handler.
    assert!(sim.events(0).is_empty());
}
