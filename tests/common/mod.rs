//! In-memory network of [Dht] nodes with a simulated clock.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use peerdht::{AddressFamily, Config, Dht, Error, Event, Id, KrpcCodec, Transport};

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Debug, Default)]
struct Wires {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    offline: HashSet<SocketAddr>,
    sent: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Network {
    wires: Rc<RefCell<Wires>>,
}

impl Network {
    fn register(&self, address: SocketAddr) {
        self.wires.borrow_mut().queues.insert(address, VecDeque::new());
    }

    fn drain(&self, address: &SocketAddr) -> Vec<Datagram> {
        self.wires
            .borrow_mut()
            .queues
            .get_mut(address)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Datagrams to and from this address are dropped.
    pub fn set_offline(&self, address: SocketAddr, offline: bool) {
        let mut wires = self.wires.borrow_mut();

        if offline {
            wires.offline.insert(address);
            if let Some(queue) = wires.queues.get_mut(&address) {
                queue.clear();
            }
        } else {
            wires.offline.remove(&address);
        }
    }

    /// Number of datagrams sent so far.
    pub fn sent(&self) -> usize {
        self.wires.borrow().sent
    }

    /// Inject a raw datagram.
    pub fn inject(&self, bytes: &[u8], from: SocketAddr, to: SocketAddr) {
        if let Some(queue) = self.wires.borrow_mut().queues.get_mut(&to) {
            queue.push_back((bytes.to_vec(), from));
        }
    }
}

#[derive(Debug)]
pub struct SimTransport {
    address: SocketAddr,
    network: Network,
}

impl Transport for SimTransport {
    fn send_to(&mut self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
        let mut wires = self.network.wires.borrow_mut();
        wires.sent += 1;

        if wires.offline.contains(&self.address) || wires.offline.contains(&to) {
            return Ok(());
        }

        // Unknown destinations silently drop, like UDP.
        if let Some(queue) = wires.queues.get_mut(&to) {
            queue.push_back((bytes.to_vec(), self.address));
        }

        Ok(())
    }

    fn supports(&self, family: AddressFamily) -> bool {
        family == AddressFamily::Ipv4
    }
}

pub struct SimNode {
    pub dht: Dht<SimTransport>,
    pub address: SocketAddr,
    pub events: flume::Receiver<Event>,
}

pub struct Sim {
    pub network: Network,
    pub nodes: Vec<SimNode>,
    pub now: Instant,
    /// Errors returned by `on_datagram`, with the index of the receiving node.
    pub errors: Vec<(usize, Error)>,
}

impl Sim {
    pub fn new() -> Self {
        Self {
            network: Network::default(),
            nodes: vec![],
            now: Instant::now(),
            errors: vec![],
        }
    }

    pub fn address(index: usize) -> SocketAddr {
        SocketAddr::from(([10, 0, (index / 250) as u8, (index % 250) as u8 + 1], 6881))
    }

    /// Add a node bootstrapping from the first node.
    pub fn add_node(&mut self) -> usize {
        let bootstrap = if self.nodes.is_empty() {
            vec![]
        } else {
            vec![Self::address(0)]
        };

        self.add_node_with(Config {
            bootstrap,
            ..Default::default()
        })
    }

    pub fn add_node_with(&mut self, config: Config) -> usize {
        let index = self.nodes.len();
        let address = Self::address(index);

        self.network.register(address);

        let (sender, events) = flume::unbounded();
        let transport = SimTransport {
            address,
            network: self.network.clone(),
        };
        let dht = Dht::new(config, transport, KrpcCodec).with_events(sender);

        self.nodes.push(SimNode {
            dht,
            address,
            events,
        });

        index
    }

    /// A network of `size` nodes, ticked until their routing tables settled.
    pub fn bootstrapped(size: usize) -> Self {
        let mut sim = Self::new();

        for _ in 0..size {
            sim.add_node();
        }

        sim.run(Duration::from_secs(30), Duration::from_millis(500));
        sim
    }

    pub fn node(&self, index: usize) -> &Dht<SimTransport> {
        &self.nodes[index].dht
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Dht<SimTransport> {
        &mut self.nodes[index].dht
    }

    pub fn id(&self, index: usize) -> Id {
        *self.nodes[index].dht.id()
    }

    pub fn events(&self, index: usize) -> Vec<Event> {
        self.nodes[index].events.try_iter().collect()
    }

    /// Deliver datagrams until every queue is empty, returns how many were delivered.
    pub fn deliver(&mut self) -> usize {
        let mut delivered = 0;

        loop {
            let wave = self.deliver_wave();
            delivered += wave;

            if wave == 0 || delivered > 1_000_000 {
                return delivered;
            }
        }
    }

    /// Deliver only the datagrams already queued, not the ones sent while handling them.
    pub fn deliver_wave(&mut self) -> usize {
        let queued: Vec<Vec<Datagram>> = self
            .nodes
            .iter()
            .map(|node| self.network.drain(&node.address))
            .collect();

        let mut delivered = 0;

        for (index, datagrams) in queued.into_iter().enumerate() {
            for (bytes, from) in datagrams {
                if let Err(error) = self.nodes[index].dht.on_datagram_at(&bytes, from, self.now) {
                    self.errors.push((index, error));
                }
                delivered += 1;
            }
        }

        delivered
    }

    /// Advance the clock, tick every node, and deliver everything.
    pub fn step(&mut self, advance: Duration) {
        self.now += advance;

        for node in self.nodes.iter_mut() {
            node.dht.tick_at(self.now);
        }

        self.deliver();
    }

    pub fn run(&mut self, duration: Duration, step: Duration) {
        let end = self.now + duration;

        while self.now < end {
            self.step(step);
        }
    }
}
