use super::packet::ipv4_header_len;
use crate::utils::{ProbeError, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Shortest read timeout `SO_RCVTIMEO` can express; shorter values read as
/// "no timeout" in the kernel.
const MIN_READ_TIMEOUT: Duration = Duration::from_micros(1);

/// The transport the echo loop talks through.
pub trait EchoSocket {
    fn send(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Waits at most `timeout` for one ICMP message and copies it, without
    /// any IP header, into `buf`. Returns `Ok(None)` when the wait expires.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Datagram ICMP sockets have the kernel rewrite the echo identifier, so
    /// replies cannot be matched on it.
    fn kernel_assigns_identifier(&self) -> bool;
}

/// A blocking ICMP socket bound to one destination.
///
/// An unprivileged datagram socket is tried first; a raw socket is the
/// fallback when the system does not allow datagram ICMP.
pub struct IcmpSocket {
    socket: Socket,
    destination: SockAddr,
    raw: bool,
    ipv4: bool,
}

impl IcmpSocket {
    pub fn open(address: IpAddr) -> Result<Self> {
        let (domain, protocol) = match address {
            IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
            IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
        };

        let (socket, raw) = match Socket::new(domain, Type::DGRAM, Some(protocol)) {
            Ok(socket) => (socket, false),
            Err(dgram_err) => {
                log::debug!("Datagram ICMP socket unavailable ({dgram_err}), trying raw socket");
                let socket = Socket::new(domain, Type::RAW, Some(protocol)).map_err(|raw_err| {
                    ProbeError::Transport(format!(
                        "Cannot open ICMP socket: {dgram_err}; raw socket: {raw_err}"
                    ))
                })?;
                (socket, true)
            }
        };

        log::info!(
            "Opened {} ICMP socket for {}",
            if raw { "raw" } else { "datagram" },
            address
        );

        Ok(Self {
            socket,
            destination: SockAddr::from(SocketAddr::new(address, 0)),
            raw,
            ipv4: address.is_ipv4(),
        })
    }
}

impl EchoSocket for IcmpSocket {
    fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, &self.destination).map(|_| ())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if timeout < MIN_READ_TIMEOUT {
            return Ok(None);
        }
        self.socket.set_read_timeout(Some(timeout))?;

        let n = match self.socket.read(buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        // Raw IPv4 sockets deliver the IP header in front of the ICMP message.
        if self.raw && self.ipv4 {
            if let Some(header) = ipv4_header_len(&buf[..n]) {
                buf.copy_within(header..n, 0);
                return Ok(Some(n - header));
            }
        }
        Ok(Some(n))
    }

    fn kernel_assigns_identifier(&self) -> bool {
        !self.raw
    }
}
