//! Contacts as carried in KRPC messages and tracked by searches.
use std::net::{IpAddr, SocketAddr};

use crate::common::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// IP address family of a routing table, a search, or a contact.
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// The family of a socket address.
    ///
    /// IPv4-mapped IPv6 addresses count as IPv4.
    pub fn of(address: &SocketAddr) -> Self {
        match address.ip() {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(ip) if ip.to_ipv4_mapped().is_some() => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A DHT participant's Id, address and, if it gave us one, its announce token.
pub struct Node {
    pub id: Id,
    pub address: SocketAddr,
    pub token: Option<Box<[u8]>>,
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> Node {
        Node {
            id,
            address,
            token: None,
        }
    }

    #[cfg(test)]
    pub fn random() -> Node {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let ip: [u8; 4] = rng.gen();

        Node::new(Id::random(), SocketAddr::from((ip, rng.gen_range(1..u16::MAX))))
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }
}

/// Returns `true` if this address can be sent a datagram.
///
/// Rejects port 0, unspecified, multicast and broadcast addresses.
pub fn is_routable(address: &SocketAddr) -> bool {
    if address.port() == 0 {
        return false;
    }

    match address.ip() {
        IpAddr::V4(ip) => !(ip.is_unspecified() || ip.is_multicast() || ip.is_broadcast()),
        IpAddr::V6(ip) => !(ip.is_unspecified() || ip.is_multicast()),
    }
}
