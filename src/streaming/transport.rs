//! Datagram sockets over a local domain socket or UDP
//!
//! Both families are used the same way: the server binds an [`Address`],
//! clients open an unbound socket and `send_to` the server. No connection
//! state exists, so a client never notices a server restart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Largest payload sent over a local domain socket
pub const LOCAL_BUDGET: usize = 4096;

/// Largest payload sent over UDP (one Ethernet MTU, avoids fragmentation)
pub const INET_BUDGET: usize = 1500;

/// Socket family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local domain socket identified by a filesystem path
    #[default]
    Local,
    /// UDP socket identified by `host:port`
    Inet,
}

/// Resolved transport address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Local(PathBuf),
    Inet(SocketAddr),
}

impl Address {
    /// Resolve a configured address string for the given transport kind
    ///
    /// INET host names are looked up once; the first result is used.
    pub fn resolve(kind: TransportKind, address: &str) -> Result<Self> {
        match kind {
            TransportKind::Local => {
                if address.is_empty() {
                    return Err(Error::Config("Local socket path is empty".to_string()));
                }
                Ok(Address::Local(PathBuf::from(address)))
            }
            TransportKind::Inet => address
                .to_socket_addrs()
                .map_err(|e| Error::Config(format!("Cannot resolve '{}': {}", address, e)))?
                .next()
                .map(Address::Inet)
                .ok_or_else(|| Error::Config(format!("'{}' resolved to no addresses", address))),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Address::Local(_) => TransportKind::Local,
            Address::Inet(_) => TransportKind::Inet,
        }
    }

    /// Maximum encoded payload per datagram for this address family
    pub fn budget(&self) -> usize {
        match self {
            Address::Local(_) => LOCAL_BUDGET,
            Address::Inet(_) => INET_BUDGET,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Local(path) => write!(f, "{}", path.display()),
            Address::Inet(addr) => write!(f, "{}", addr),
        }
    }
}

/// Unconnected datagram socket of either family
#[derive(Debug)]
pub enum DatagramSocket {
    Unix(UnixDatagram),
    Udp(UdpSocket),
}

impl DatagramSocket {
    /// Bind a receiving socket at `address`
    pub fn bind(address: &Address) -> io::Result<Self> {
        match address {
            Address::Local(path) => UnixDatagram::bind(path).map(DatagramSocket::Unix),
            Address::Inet(addr) => UdpSocket::bind(addr).map(DatagramSocket::Udp),
        }
    }

    /// Open a sending socket able to reach `target`
    pub fn unbound_for(target: &Address) -> io::Result<Self> {
        match target {
            Address::Local(_) => UnixDatagram::unbound().map(DatagramSocket::Unix),
            Address::Inet(SocketAddr::V4(_)) => UdpSocket::bind("0.0.0.0:0").map(DatagramSocket::Udp),
            Address::Inet(SocketAddr::V6(_)) => UdpSocket::bind("[::]:0").map(DatagramSocket::Udp),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            DatagramSocket::Unix(socket) => socket.set_nonblocking(nonblocking),
            DatagramSocket::Udp(socket) => socket.set_nonblocking(nonblocking),
        }
    }

    /// Send one datagram to `target`
    pub fn send_to(&self, buf: &[u8], target: &Address) -> io::Result<usize> {
        match (self, target) {
            (DatagramSocket::Unix(socket), Address::Local(path)) => socket.send_to(buf, path),
            (DatagramSocket::Udp(socket), Address::Inet(addr)) => socket.send_to(buf, addr),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Address family mismatch for {}", target),
            )),
        }
    }

    /// Receive one datagram; the sender address is not needed
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DatagramSocket::Unix(socket) => socket.recv_from(buf).map(|(len, _)| len),
            DatagramSocket::Udp(socket) => socket.recv_from(buf).map(|(len, _)| len),
        }
    }

    /// Address the socket is bound to, as seen by senders
    pub fn local_address(&self) -> io::Result<Option<Address>> {
        match self {
            DatagramSocket::Unix(socket) => Ok(socket
                .local_addr()?
                .as_pathname()
                .map(|p| Address::Local(p.to_path_buf()))),
            DatagramSocket::Udp(socket) => socket.local_addr().map(|a| Some(Address::Inet(a))),
        }
    }
}
