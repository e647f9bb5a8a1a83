//! Datagram transports the node sends through.

use std::fmt::Debug;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, UdpSocket};

use tracing::debug;

use crate::common::AddressFamily;

/// Default port to listen on, falls back to a random port if it is taken.
pub const DEFAULT_PORT: u16 = 6881;
/// Large enough for any KRPC message.
pub const MTU: usize = 2048;

/// Where outgoing datagrams go.
///
/// Receiving is left to the caller, which feeds datagrams to [crate::Dht::on_datagram].
pub trait Transport: Debug {
    fn send_to(&mut self, bytes: &[u8], to: SocketAddr) -> io::Result<()>;

    /// Returns `true` if datagrams can be sent to addresses of this family.
    fn supports(&self, family: AddressFamily) -> bool;
}

#[derive(Debug)]
/// A pair of non-blocking [UdpSocket]s, one per address family.
pub struct UdpTransport {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl UdpTransport {
    /// Bind an IPv4 socket and, if `ipv6` is set, an IPv6 socket on the same port.
    ///
    /// Without an explicit `port`, tries [DEFAULT_PORT] before a random port.
    pub fn bind(port: Option<u16>, ipv6: bool) -> io::Result<Self> {
        let v4 = match port {
            Some(port) => UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?,
            None => match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))) {
                Ok(socket) => socket,
                Err(_) => UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?,
            },
        };
        v4.set_nonblocking(true)?;

        let v6 = if ipv6 {
            let port = v4.local_addr()?.port();

            // A dual stack socket can't share the port with the IPv4 one.
            let bound = UdpSocket::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
                .or_else(|_| UdpSocket::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))));

            match bound {
                Ok(socket) => {
                    socket.set_nonblocking(true)?;
                    Some(socket)
                }
                Err(error) => {
                    debug!(?error, "Could not bind an IPv6 socket, continuing with IPv4 only");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self { v4: Some(v4), v6 })
    }

    /// Address of the IPv4 socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match (&self.v4, &self.v6) {
            (Some(socket), _) | (None, Some(socket)) => socket.local_addr(),
            (None, None) => Err(io::Error::new(io::ErrorKind::NotConnected, "no socket")),
        }
    }

    /// Receive one datagram from either socket without blocking.
    ///
    /// Returns `Ok(None)` when there is nothing to read.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        for socket in self.v4.iter().chain(self.v6.iter()) {
            match socket.recv_from(buf) {
                Ok(received) => return Ok(Some(received)),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => continue,
                Err(error) => return Err(error),
            }
        }

        Ok(None)
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
        // IPv4-mapped addresses go through the IPv4 socket.
        let to = match to.ip() {
            IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
                Some(v4) => SocketAddr::new(IpAddr::V4(v4), to.port()),
                None => to,
            },
            IpAddr::V4(_) => to,
        };

        let socket = match AddressFamily::of(&to) {
            AddressFamily::Ipv4 => self.v4.as_ref(),
            AddressFamily::Ipv6 => self.v6.as_ref(),
        };

        match socket {
            Some(socket) => socket.send_to(bytes, to).map(|_| ()),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "address family disabled",
            )),
        }
    }

    fn supports(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::Ipv4 => self.v4.is_some(),
            AddressFamily::Ipv6 => self.v6.is_some(),
        }
    }
}
