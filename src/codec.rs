//! Construct ICMPv4/ICMPv6 Echo Request packets and classify inbound
//! datagrams, including the nested "original datagram" carried inside Time
//! Exceeded and Destination Unreachable messages.
//!
//! One family-aware codec rather than parallel v4/v6 implementations;
//! identifier filtering is skippable via a construction flag since some
//! kernels rewrite the ICMP identifier on unprivileged ping sockets.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::checksum::internet_checksum;
use crate::family::AddrFamily;

/// Minimum payload length the codec pads every outgoing probe to, so that a
/// Time Exceeded / Unreachable inner datagram always carries enough bytes to
/// recover identifier and sequence even if the path truncates the original
/// packet to the "first 8 bytes beyond the IP header" IETF minimum.
const PAYLOAD_LEN: usize = 16;

const ICMP_HEADER_LEN: usize = 8;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// Fixed-layout payload the engine places inside every outgoing Echo: not
/// semantically required by any router along the path, but enables a
/// round-trip self-check over loopback and lets a late reply be matched
/// back to its original send time even if the `ProbeTable` entry has already
/// been swept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbePayload {
    pub send_timestamp: f64,
    pub hop: u8,
    pub probe_index: u8,
}

impl ProbePayload {
    pub fn now(hop: u8, probe_index: u8) -> Self {
        let send_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self {
            send_timestamp,
            hop,
            probe_index,
        }
    }

    fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut buf = [0u8; PAYLOAD_LEN];
        buf[0..8].copy_from_slice(&self.send_timestamp.to_be_bytes());
        buf[8] = self.hop;
        buf[9] = self.probe_index;
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 10 {
            return None;
        }
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&buf[0..8]);
        Some(Self {
            send_timestamp: f64::from_be_bytes(ts_bytes),
            hop: buf[8],
            probe_index: buf[9],
        })
    }
}

/// Result of classifying an inbound datagram against the session identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    EchoReply { seq: u16, id: u16 },
    TimeExceeded { inner_seq: u16, inner_id: u16 },
    Unreachable { inner_seq: u16, inner_id: u16, code: u8 },
    /// Recognized but not interesting to this session (e.g. foreign
    /// identifier, or an ICMP type this engine doesn't act on).
    Other,
    /// Too short or otherwise inconsistent to safely parse.
    Malformed,
}

/// Builds and parses ICMP Echo traffic for one session identifier.
pub struct IcmpCodec {
    identifier: u16,
    /// When set, skip the identifier filter on Echo Reply: an unprivileged
    /// datagram socket may have its Identifier field rewritten by the
    /// kernel, so the codec cannot rely on it to demultiplex.
    unprivileged: bool,
}

impl IcmpCodec {
    pub fn new(identifier: u16, unprivileged: bool) -> Self {
        Self {
            identifier,
            unprivileged,
        }
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Build an Echo Request datagram: 8-byte ICMP header followed by the
    /// encoded [`ProbePayload`]. IPv4 carries a computed checksum; IPv6
    /// leaves the checksum field zero for the kernel to fill in.
    pub fn build_echo(&self, family: AddrFamily, sequence: u16, payload: &ProbePayload) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + PAYLOAD_LEN);
        packet.push(family.echo_request_type());
        packet.push(0); // code
        packet.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder
        packet.extend_from_slice(&self.identifier.to_be_bytes());
        packet.extend_from_slice(&sequence.to_be_bytes());
        packet.extend_from_slice(&payload.encode());

        if family == AddrFamily::V4 {
            let sum = internet_checksum(&packet);
            packet[2..4].copy_from_slice(&sum.to_be_bytes());
        }

        packet
    }

    /// Classify an inbound datagram, filtering out anything not addressed to
    /// this session's identifier.
    pub fn classify(&self, family: AddrFamily, datagram: &[u8]) -> Classification {
        let icmp = match locate_icmp(family, datagram) {
            Some(icmp) => icmp,
            None => return Classification::Malformed,
        };
        if icmp.len() < ICMP_HEADER_LEN {
            return Classification::Malformed;
        }

        let icmp_type = icmp[0];
        let code = icmp[1];

        if icmp_type == family.echo_reply_type() {
            let seq = u16::from_be_bytes([icmp[6], icmp[7]]);
            let id = u16::from_be_bytes([icmp[4], icmp[5]]);
            if self.unprivileged || id == self.identifier {
                return Classification::EchoReply { seq, id };
            }
            return Classification::Other;
        }

        if icmp_type == family.time_exceeded_type() || icmp_type == family.unreachable_type() {
            let inner = &icmp[ICMP_HEADER_LEN..];
            let (inner_id, inner_seq) = match extract_inner_identity(family, inner) {
                Some(pair) => pair,
                None => return Classification::Malformed,
            };
            if !self.unprivileged && inner_id != self.identifier {
                return Classification::Other;
            }
            if icmp_type == family.time_exceeded_type() {
                return Classification::TimeExceeded { inner_seq, inner_id };
            }
            return Classification::Unreachable {
                inner_seq,
                inner_id,
                code,
            };
        }

        Classification::Other
    }
}

/// Find the ICMP header within a raw-socket read, stripping a leading IP
/// header when present.
fn locate_icmp(family: AddrFamily, datagram: &[u8]) -> Option<&[u8]> {
    match family {
        AddrFamily::V4 => {
            if datagram.is_empty() {
                return None;
            }
            let version = datagram[0] >> 4;
            if version == 4 && datagram.len() >= IPV4_MIN_HEADER_LEN {
                let ihl = ((datagram[0] & 0x0f) as usize) * 4;
                if ihl < IPV4_MIN_HEADER_LEN || datagram.len() < ihl {
                    return None;
                }
                Some(&datagram[ihl..])
            } else {
                Some(datagram)
            }
        }
        AddrFamily::V6 => Some(datagram),
    }
}

/// Extract `(identifier, sequence)` from the inner datagram nested inside a
/// Time Exceeded / Destination Unreachable payload.
fn extract_inner_identity(family: AddrFamily, inner: &[u8]) -> Option<(u16, u16)> {
    let inner_icmp = match family {
        AddrFamily::V4 => {
            if inner.len() < IPV4_MIN_HEADER_LEN + ICMP_HEADER_LEN {
                return None;
            }
            let inner_ihl = ((inner[0] & 0x0f) as usize) * 4;
            if inner_ihl < IPV4_MIN_HEADER_LEN || inner.len() < inner_ihl + ICMP_HEADER_LEN {
                return None;
            }
            &inner[inner_ihl..inner_ihl + ICMP_HEADER_LEN]
        }
        AddrFamily::V6 => {
            if inner.len() < IPV6_HEADER_LEN + ICMP_HEADER_LEN {
                return None;
            }
            &inner[IPV6_HEADER_LEN..IPV6_HEADER_LEN + ICMP_HEADER_LEN]
        }
    };

    let id = u16::from_be_bytes([inner_icmp[4], inner_icmp[5]]);
    let seq = u16::from_be_bytes([inner_icmp[6], inner_icmp[7]]);
    Some((id, seq))
}

/// Decode the [`ProbePayload`] carried in an outgoing-style Echo datagram
/// (used by loopback-style tests and by the pinger's RTT recovery path when
/// a reply's `ProbeTable` entry has already been swept).
pub fn decode_payload(family: AddrFamily, datagram: &[u8]) -> Option<ProbePayload> {
    let icmp = locate_icmp(family, datagram)?;
    if icmp.len() <= ICMP_HEADER_LEN {
        return None;
    }
    ProbePayload::decode(&icmp[ICMP_HEADER_LEN..])
}
