//! Datagram socket abstraction. See [`DatagramSocket`] and [`UdpTransport`].
//!
//! `spec.md` §1 lists the datagram socket as an external collaborator, not
//! part of the core; this module specifies only the interface the
//! [`Manager`](crate::manager::Manager) needs against it, plus the one real
//! implementation (dual-stack IPv4/IPv6 over `std::net::UdpSocket`).

use std::{
    io,
    net::{IpAddr, SocketAddr, UdpSocket},
    time::{Duration, Instant},
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::ManagerConfig;

/// What the manager's tick loop needs from a socket: send, and a
/// timeout-bounded receive.
///
/// A trait rather than a concrete type so tests can substitute an in-memory
/// double instead of binding real ports.
pub trait DatagramSocket {
    /// Sends `buf` to `target`. Mirrors `sendto`'s error surface: the
    /// manager maps specific OS error kinds to the transient-I/O taxonomy
    /// in `spec.md` §7.
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Blocks for at most `budget` waiting for one datagram, returning its
    /// length and sender. `Err(io::ErrorKind::WouldBlock)` (or
    /// `TimedOut`) signals the budget elapsed with nothing received.
    fn recv_from(&self, buf: &mut [u8], budget: Duration) -> io::Result<(usize, SocketAddr)>;
}

/// Real dual-stack transport: up to one bound IPv4 socket and one bound
/// IPv6 socket, per `ManagerConfig::enable_ipv4`/`enable_ipv6`.
///
/// `std::net::UdpSocket` has no portable way to poll two sockets at once
/// without pulling in an async runtime the rest of this crate doesn't use,
/// so when both families are enabled, [`Self::recv_from`] splits the tick
/// budget between them and alternates which one is polled first, round to
/// round, so neither starves the other under sustained traffic.
pub struct UdpTransport {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
    poll_v4_first: std::cell::Cell<bool>,
}

impl UdpTransport {
    /// Binds according to `config.enable_ipv4`/`enable_ipv6`/`reuse_address`.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if neither family is enabled, or if a bind
    /// fails.
    pub fn bind(port: u16, config: &ManagerConfig) -> io::Result<Self> {
        if !config.enable_ipv4 && !config.enable_ipv6 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "neither enable_ipv4 nor enable_ipv6 set",
            ));
        }
        let v4 = config
            .enable_ipv4
            .then(|| bind_one(IpAddr::from([0, 0, 0, 0]), port, config.reuse_address, config.discovery_enabled))
            .transpose()?;
        let v6 = config
            .enable_ipv6
            .then(|| bind_one(IpAddr::from([0u16; 8]), port, config.reuse_address, false))
            .transpose()?;
        Ok(Self {
            v4,
            v6,
            poll_v4_first: std::cell::Cell::new(true),
        })
    }

    /// The bound IPv4 address, if `enable_ipv4` was set. Useful when binding
    /// to port `0` and letting the OS assign one.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if the underlying `local_addr` call fails.
    pub fn local_addr_v4(&self) -> io::Result<Option<SocketAddr>> {
        self.v4.as_ref().map(UdpSocket::local_addr).transpose()
    }

    /// The bound IPv6 address, if `enable_ipv6` was set.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if the underlying `local_addr` call fails.
    pub fn local_addr_v6(&self) -> io::Result<Option<SocketAddr>> {
        self.v6.as_ref().map(UdpSocket::local_addr).transpose()
    }
}

fn bind_one(ip: IpAddr, port: u16, reuse_address: bool, broadcast: bool) -> io::Result<UdpSocket> {
    let domain = if ip.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    if broadcast && domain == Domain::IPV4 {
        // Only meaningful for IPv4 - `DiscoveryEnabled` broadcasts a
        // `DiscoveryRequest` to a subnet, which has no IPv6 equivalent.
        socket.set_broadcast(true)?;
    }
    if domain == Domain::IPV6 {
        // Keep the two families on independent sockets rather than one
        // dual-stack IPv6 socket, so `enable_ipv4`/`enable_ipv6` behave
        // symmetrically across platforms that default V6ONLY differently.
        socket.set_only_v6(true)?;
    }
    socket.bind(&SocketAddr::new(ip, port).into())?;
    socket.set_nonblocking(false)?;
    Ok(socket.into())
}

impl DatagramSocket for UdpTransport {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let socket = match target {
            SocketAddr::V4(_) => self.v4.as_ref(),
            SocketAddr::V6(_) => self.v6.as_ref(),
        };
        let socket = socket.ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address family not enabled")
        })?;
        socket.send_to(buf, target)
    }

    fn recv_from(&self, buf: &mut [u8], budget: Duration) -> io::Result<(usize, SocketAddr)> {
        let deadline = Instant::now() + budget;
        let v4_first = self.poll_v4_first.get();
        self.poll_v4_first.set(!v4_first);

        let order: [Option<&UdpSocket>; 2] = if v4_first {
            [self.v4.as_ref(), self.v6.as_ref()]
        } else {
            [self.v6.as_ref(), self.v4.as_ref()]
        };
        let active: Vec<&UdpSocket> = order.into_iter().flatten().collect();
        if active.is_empty() {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no socket bound"));
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            let slice = remaining / u32::try_from(active.len()).unwrap_or(1);
            for socket in &active {
                socket.set_read_timeout(Some(slice.max(Duration::from_millis(1))))?;
                match socket.recv_from(buf) {
                    Ok(result) => return Ok(result),
                    Err(err)
                        if err.kind() == io::ErrorKind::WouldBlock
                            || err.kind() == io::ErrorKind::TimedOut => {}
                    Err(err) => return Err(err),
                }
                if Instant::now() >= deadline {
                    return Err(io::ErrorKind::TimedOut.into());
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{
        collections::VecDeque,
        sync::Mutex,
    };

    use super::{DatagramSocket, SocketAddr};

    /// In-memory loopback double: anything sent to `peer_addr` is queued for
    /// the matching [`LoopbackSocket`] to receive.
    pub struct LoopbackSocket {
        pub local: SocketAddr,
        inbox: Mutex<VecDeque<(SocketAddr, Vec<u8>)>>,
    }

    impl LoopbackSocket {
        pub fn new(local: SocketAddr) -> Self {
            Self {
                local,
                inbox: Mutex::new(VecDeque::new()),
            }
        }

        pub fn deliver(&self, from: SocketAddr, bytes: &[u8]) {
            self.inbox.lock().unwrap().push_back((from, bytes.to_vec()));
        }
    }

    impl DatagramSocket for LoopbackSocket {
        fn send_to(&self, _buf: &[u8], _target: SocketAddr) -> std::io::Result<usize> {
            unimplemented!("route sends through a shared LoopbackNetwork in tests that need it")
        }

        fn recv_from(&self, buf: &mut [u8], _budget: std::time::Duration) -> std::io::Result<(usize, SocketAddr)> {
            match self.inbox.lock().unwrap().pop_front() {
                Some((from, bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok((n, from))
                }
                None => Err(std::io::ErrorKind::WouldBlock.into()),
            }
        }
    }
}
