//! ICMP echo message encoding and decoding for IPv4 and IPv6.

use crate::network::IpVersion;
use crate::utils::{ProbeError, Result};

pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

pub const HEADER_LEN: usize = 8;

const IPV6_HEADER_LEN: usize = 40;
const IPV6_NEXT_HEADER_ICMPV6: u8 = 58;

/// A decoded ICMP message, reduced to what the echo loop needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply { identifier: u16, sequence: u16 },
    EchoRequest { identifier: u16, sequence: u16 },
    /// Error report (unreachable, time exceeded, ...). `quoted` holds the
    /// identifier and sequence of the echo request it refers to, when the
    /// quoted datagram is one.
    Error {
        icmp_type: u8,
        code: u8,
        quoted: Option<(u16, u16)>,
    },
    /// Any other informational message.
    Other { icmp_type: u8, code: u8 },
}

pub const fn echo_request_type(version: IpVersion) -> u8 {
    match version {
        IpVersion::V4 => ICMPV4_ECHO_REQUEST,
        IpVersion::V6 => ICMPV6_ECHO_REQUEST,
    }
}

pub const fn echo_reply_type(version: IpVersion) -> u8 {
    match version {
        IpVersion::V4 => ICMPV4_ECHO_REPLY,
        IpVersion::V6 => ICMPV6_ECHO_REPLY,
    }
}

/// Whether `icmp_type` is an error message that quotes the offending datagram.
pub const fn is_error_type(version: IpVersion, icmp_type: u8) -> bool {
    match version {
        // Destination unreachable, source quench, redirect, time exceeded,
        // parameter problem.
        IpVersion::V4 => matches!(icmp_type, 3 | 4 | 5 | 11 | 12),
        IpVersion::V6 => matches!(icmp_type, 1..=4),
    }
}

/// Identifier and sequence of the echo request quoted in an error body.
fn quoted_echo(version: IpVersion, body: &[u8]) -> Option<(u16, u16)> {
    let inner = match version {
        IpVersion::V4 => body.get(ipv4_header_len(body)?..)?,
        IpVersion::V6 => {
            let header = body.get(..IPV6_HEADER_LEN)?;
            if header[0] >> 4 != 6 || header[6] != IPV6_NEXT_HEADER_ICMPV6 {
                return None;
            }
            &body[IPV6_HEADER_LEN..]
        }
    };

    if inner.len() < HEADER_LEN || inner[0] != echo_request_type(version) {
        return None;
    }
    Some((
        u16::from_be_bytes([inner[4], inner[5]]),
        u16::from_be_bytes([inner[6], inner[7]]),
    ))
}

/// RFC 1071 internet checksum.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Encodes an echo-style message.
///
/// ICMPv6 checksums cover a pseudo header only the kernel knows, so they are
/// left zero for the kernel to fill in.
pub fn encode_echo(
    version: IpVersion,
    icmp_type: u8,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.push(icmp_type);
    packet.push(0);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);

    if version == IpVersion::V4 {
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

pub fn echo_request(version: IpVersion, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    encode_echo(version, echo_request_type(version), identifier, sequence, payload)
}

pub fn parse(version: IpVersion, bytes: &[u8]) -> Result<IcmpMessage> {
    if bytes.len() < HEADER_LEN {
        return Err(ProbeError::Parse(format!(
            "ICMP message too short: {} bytes",
            bytes.len()
        )));
    }

    if version == IpVersion::V4 && checksum(bytes) != 0 {
        return Err(ProbeError::Parse("ICMP checksum mismatch".to_string()));
    }

    let icmp_type = bytes[0];
    let code = bytes[1];
    let identifier = u16::from_be_bytes([bytes[4], bytes[5]]);
    let sequence = u16::from_be_bytes([bytes[6], bytes[7]]);

    let message = if icmp_type == echo_reply_type(version) {
        IcmpMessage::EchoReply {
            identifier,
            sequence,
        }
    } else if icmp_type == echo_request_type(version) {
        IcmpMessage::EchoRequest {
            identifier,
            sequence,
        }
    } else if is_error_type(version, icmp_type) {
        IcmpMessage::Error {
            icmp_type,
            code,
            quoted: quoted_echo(version, &bytes[HEADER_LEN..]),
        }
    } else {
        IcmpMessage::Other { icmp_type, code }
    };
    Ok(message)
}

/// Length of the IPv4 header at the start of a raw-socket datagram.
pub fn ipv4_header_len(datagram: &[u8]) -> Option<usize> {
    let first = *datagram.first()?;
    if first >> 4 != 4 {
        return None;
    }
    let len = usize::from(first & 0x0f) * 4;
    (len >= 20 && datagram.len() >= len).then_some(len)
}
