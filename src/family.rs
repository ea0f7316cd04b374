//! Address family selection: IPv4 vs. IPv6, and the constants each implies.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Caller-facing address family preference, validated against the
/// resolver's result: `V4Only` rejects IPv6 candidates and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressStyle {
    Any,
    V4Only,
    V6Only,
}

impl Default for AddressStyle {
    fn default() -> Self {
        AddressStyle::Any
    }
}

impl AddressStyle {
    /// Whether `addr` is an acceptable candidate under this style.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match (self, addr) {
            (AddressStyle::Any, _) => true,
            (AddressStyle::V4Only, SocketAddr::V4(_)) => true,
            (AddressStyle::V6Only, SocketAddr::V6(_)) => true,
            _ => false,
        }
    }
}

/// The concrete family a [`crate::session::Session`] ends up bound to, once
/// an address has been chosen. Carries the ICMP type constants and the
/// socket-level TTL/hop-limit option that differ between v4 and v6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    V4,
    V6,
}

impl AddrFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddrFamily::V4,
            IpAddr::V6(_) => AddrFamily::V6,
        }
    }

    /// ICMP Echo Request type for this family (8 for v4, 128 for v6).
    pub fn echo_request_type(&self) -> u8 {
        match self {
            AddrFamily::V4 => 8,
            AddrFamily::V6 => 128,
        }
    }

    /// ICMP Echo Reply type for this family (0 for v4, 129 for v6).
    pub fn echo_reply_type(&self) -> u8 {
        match self {
            AddrFamily::V4 => 0,
            AddrFamily::V6 => 129,
        }
    }

    /// ICMP Time Exceeded type for this family (11 for v4, 3 for v6).
    pub fn time_exceeded_type(&self) -> u8 {
        match self {
            AddrFamily::V4 => 11,
            AddrFamily::V6 => 3,
        }
    }

    /// ICMP Destination Unreachable type for this family (3 for v4, 1 for v6).
    pub fn unreachable_type(&self) -> u8 {
        match self {
            AddrFamily::V4 => 3,
            AddrFamily::V6 => 1,
        }
    }

    pub fn matches_style(&self, style: AddressStyle) -> bool {
        matches!(
            (self, style),
            (_, AddressStyle::Any)
                | (AddrFamily::V4, AddressStyle::V4Only)
                | (AddrFamily::V6, AddressStyle::V6Only)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn family_of_detects_v4_and_v6() {
        assert_eq!(
            AddrFamily::of(&IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))),
            AddrFamily::V4
        );
        assert_eq!(AddrFamily::of(&IpAddr::V6(Ipv6Addr::LOCALHOST)), AddrFamily::V6);
    }

    #[test]
    fn style_rejects_mismatched_family() {
        assert!(!AddrFamily::V6.matches_style(AddressStyle::V4Only));
        assert!(!AddrFamily::V4.matches_style(AddressStyle::V6Only));
        assert!(AddrFamily::V4.matches_style(AddressStyle::Any));
    }

    #[test]
    fn icmp_type_constants() {
        assert_eq!(AddrFamily::V4.echo_request_type(), 8);
        assert_eq!(AddrFamily::V4.echo_reply_type(), 0);
        assert_eq!(AddrFamily::V4.time_exceeded_type(), 11);
        assert_eq!(AddrFamily::V6.echo_request_type(), 128);
        assert_eq!(AddrFamily::V6.echo_reply_type(), 129);
        assert_eq!(AddrFamily::V6.time_exceeded_type(), 3);
    }
}
