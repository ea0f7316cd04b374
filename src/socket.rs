//! The concrete probe socket `Session` sends through and reads from.
//!
//! Kept as a narrow trait (`ProbeSocket`) rather than a bare `socket2::Socket`
//! field so tests can swap in a scripted double without touching the kernel
//! — the engine itself never depends on `socket2` directly outside this
//! module.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{EngineError, Result};
use crate::family::AddrFamily;

/// What `Session` needs from a bound ICMP socket: set the TTL/hop-limit,
/// send to the fixed destination, and drain inbound datagrams
/// non-blockingly.
pub trait ProbeSocket: Send + Sync {
    fn set_ttl(&self, ttl: u8) -> io::Result<()>;
    fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize>;
    /// Non-blocking receive; returns `io::ErrorKind::WouldBlock` when no
    /// datagram is currently available. The returned address is the
    /// datagram's sender — the router that generated a Time Exceeded /
    /// Unreachable, or the target itself for an Echo Reply.
    fn try_recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn raw_fd(&self) -> RawFd;
}

/// `ProbeSocket` backed by a real raw or unprivileged-datagram ICMP socket.
pub struct IcmpSocket {
    socket: Socket,
    family: AddrFamily,
}

impl IcmpSocket {
    /// Open the socket for `family`. `unprivileged` selects an
    /// `SOCK_DGRAM`/`IPPROTO_ICMP` ping socket (no `CAP_NET_RAW` required on
    /// platforms that support it) instead of `SOCK_RAW`.
    pub fn open(family: AddrFamily, unprivileged: bool) -> Result<Self, EngineError> {
        let (domain, protocol) = match family {
            AddrFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
            AddrFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        let socket_type = if unprivileged { Type::DGRAM } else { Type::RAW };

        let socket = Socket::new(domain, socket_type, Some(protocol)).map_err(|e| {
            EngineError::NetworkError {
                address: None,
                source: e,
            }
        })?;
        socket.set_nonblocking(true).map_err(EngineError::SystemError)?;

        Ok(Self { socket, family })
    }

    pub fn family(&self) -> AddrFamily {
        self.family
    }
}

impl ProbeSocket for IcmpSocket {
    fn set_ttl(&self, ttl: u8) -> io::Result<()> {
        match self.family {
            AddrFamily::V4 => self.socket.set_ttl(ttl as u32),
            AddrFamily::V6 => self.socket.set_unicast_hops_v6(ttl as u32),
        }
    }

    fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, &dest.into())
    }

    fn try_recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut uninit = vec![std::mem::MaybeUninit::<u8>::uninit(); buf.len()];
        let (len, addr) = self.socket.recv_from(&mut uninit)?;
        for i in 0..len {
            // SAFETY: `recv_from` reports `len` bytes written into `uninit`.
            buf[i] = unsafe { uninit[i].assume_init() };
        }
        let addr = addr.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unsupported sockaddr family")
        })?;
        Ok((len, addr))
    }

    fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Opens a [`ProbeSocket`] for a resolved family. A `Session` is generic
/// over this capability the same way it is over [`crate::resolver::Resolver`]
/// and [`crate::reactor::Reactor`], so a test can substitute a scripted
/// socket without a real kernel ICMP socket.
pub trait SocketOpener: Send + Sync {
    fn open(&self, family: AddrFamily, unprivileged: bool) -> Result<Box<dyn ProbeSocket>>;
}

/// `SocketOpener` backed by a real raw or unprivileged-datagram ICMP socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSocketOpener;

impl SocketOpener for SystemSocketOpener {
    fn open(&self, family: AddrFamily, unprivileged: bool) -> Result<Box<dyn ProbeSocket>> {
        Ok(Box::new(IcmpSocket::open(family, unprivileged)?))
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted `ProbeSocket` double: records every send, serves pre-queued
    /// inbound datagrams in FIFO order.
    #[derive(Default)]
    pub struct FakeProbeSocket {
        pub sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
        pub ttl_calls: Mutex<Vec<u8>>,
        inbound: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
    }

    impl FakeProbeSocket {
        pub fn push_inbound(&self, datagram: Vec<u8>, from: SocketAddr) {
            self.inbound.lock().unwrap().push_back((datagram, from));
        }
    }

    impl ProbeSocket for FakeProbeSocket {
        fn set_ttl(&self, ttl: u8) -> io::Result<()> {
            self.ttl_calls.lock().unwrap().push(ttl);
            Ok(())
        }

        fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
            self.sent.lock().unwrap().push((dest, buf.to_vec()));
            Ok(buf.len())
        }

        fn try_recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let mut inbound = self.inbound.lock().unwrap();
            match inbound.pop_front() {
                Some((datagram, from)) => {
                    let len = datagram.len().min(buf.len());
                    buf[..len].copy_from_slice(&datagram[..len]);
                    Ok((len, from))
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }

        fn raw_fd(&self) -> RawFd {
            -1
        }
    }

    /// `SocketOpener` that always hands out the same pre-wired
    /// [`FakeProbeSocket`], regardless of requested family.
    #[derive(Clone)]
    pub struct FakeSocketOpener {
        pub socket: Arc<FakeProbeSocket>,
    }

    impl FakeSocketOpener {
        pub fn new(socket: Arc<FakeProbeSocket>) -> Self {
            Self { socket }
        }
    }

    impl SocketOpener for FakeSocketOpener {
        fn open(&self, _family: AddrFamily, _unprivileged: bool) -> Result<Box<dyn ProbeSocket>> {
            Ok(Box::new(ClonedFakeSocket(self.socket.clone())))
        }
    }

    /// Wraps the shared `Arc<FakeProbeSocket>` so it can be boxed as a
    /// fresh `ProbeSocket` each time `open` is called while all clones
    /// observe the same underlying queue.
    struct ClonedFakeSocket(Arc<FakeProbeSocket>);

    impl ProbeSocket for ClonedFakeSocket {
        fn set_ttl(&self, ttl: u8) -> io::Result<()> {
            self.0.set_ttl(ttl)
        }

        fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
            self.0.send_to(buf, dest)
        }

        fn try_recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.0.try_recv(buf)
        }

        fn raw_fd(&self) -> RawFd {
            self.0.raw_fd()
        }
    }
}
