//! IP packets read from the tunnel device
//!
//! A [`PacketBuffer`] is the fixed-capacity storage one device read lands in.
//! Filling it with the number of bytes read yields a [`Packet`], which is the
//! only type that exposes bytes, protocol or addresses. Nothing can inspect a
//! packet before its length is known.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use smoltcp::wire::{IpProtocol, Ipv4Packet, Ipv6Packet};

/// Default buffer capacity (MTU of the tunnel interface)
pub const DEFAULT_MTU: usize = 1500;

/// Minimum IPv4 header size (no options). Packets below this are never parsed.
pub const MIN_IP_HEADER_SIZE: usize = 20;

/// Fixed IPv6 header size
pub const IPV6_HEADER_SIZE: usize = 40;

// Address offsets within the fixed IP headers
const IPV4_SRC: std::ops::Range<usize> = 12..16;
const IPV4_DST: std::ops::Range<usize> = 16..20;
const IPV6_SRC: std::ops::Range<usize> = 8..24;
const IPV6_DST: std::ops::Range<usize> = 24..40;

/// Transport protocol carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    /// Any other IP protocol number (ICMP, GRE, ...)
    Other(u8),
    /// Too short or not IPv4/IPv6
    Unknown,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Udp => "udp",
            TransportProtocol::Other(_) => "other",
            TransportProtocol::Unknown => "unknown",
        }
    }
}

impl From<IpProtocol> for TransportProtocol {
    fn from(proto: IpProtocol) -> Self {
        match proto {
            IpProtocol::Tcp => TransportProtocol::Tcp,
            IpProtocol::Udp => TransportProtocol::Udp,
            other => TransportProtocol::Other(u8::from(other)),
        }
    }
}

/// Unfilled, fixed-capacity read buffer.
pub struct PacketBuffer {
    data: Vec<u8>,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Write area for the device read
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record the read length and derive the protocol tag.
    ///
    /// A length beyond the capacity is clamped.
    pub fn fill(mut self, len: usize) -> Packet {
        self.data.truncate(len.min(self.data.len()));
        let protocol = classify(&self.data);
        Packet {
            data: self.data,
            protocol,
        }
    }
}

/// A filled packet: raw IP datagram bytes plus the derived protocol tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    protocol: TransportProtocol,
}

impl Packet {
    /// Build a packet from already-received bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = PacketBuffer::new(bytes.len());
        buf.as_mut_slice().copy_from_slice(bytes);
        buf.fill(bytes.len())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// IP version nibble, if the packet is long enough to carry a header.
    pub fn ip_version(&self) -> Option<u8> {
        if self.data.len() < MIN_IP_HEADER_SIZE {
            return None;
        }
        Some(self.data[0] >> 4)
    }

    /// Destination address from the IP header.
    ///
    /// `None` for packets below the minimum header size, truncated IPv6
    /// headers and unknown IP versions.
    pub fn destination(&self) -> Option<IpAddr> {
        match self.ip_version()? {
            4 => Some(IpAddr::V4(ipv4_at(&self.data, IPV4_DST))),
            6 if self.data.len() >= IPV6_HEADER_SIZE => {
                Some(IpAddr::V6(ipv6_at(&self.data, IPV6_DST)))
            }
            _ => None,
        }
    }

    /// Source address from the IP header.
    pub fn source(&self) -> Option<IpAddr> {
        match self.ip_version()? {
            4 => Some(IpAddr::V4(ipv4_at(&self.data, IPV4_SRC))),
            6 if self.data.len() >= IPV6_HEADER_SIZE => {
                Some(IpAddr::V6(ipv6_at(&self.data, IPV6_SRC)))
            }
            _ => None,
        }
    }

    /// Transport-layer payload (the bytes after the IP header).
    pub fn transport_payload(&self) -> Option<&[u8]> {
        match self.ip_version()? {
            4 => Ipv4Packet::new_checked(&self.data[..])
                .ok()
                .map(|_| {
                    let ihl = usize::from(self.data[0] & 0x0f) * 4;
                    &self.data[ihl.min(self.data.len())..]
                }),
            6 if self.data.len() >= IPV6_HEADER_SIZE => Some(&self.data[IPV6_HEADER_SIZE..]),
            _ => None,
        }
    }
}

fn ipv4_at(data: &[u8], range: std::ops::Range<usize>) -> Ipv4Addr {
    let mut octets = [0u8; 4];
    octets.copy_from_slice(&data[range]);
    Ipv4Addr::from(octets)
}

fn ipv6_at(data: &[u8], range: std::ops::Range<usize>) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[range]);
    Ipv6Addr::from(octets)
}

fn classify(data: &[u8]) -> TransportProtocol {
    if data.len() < MIN_IP_HEADER_SIZE {
        return TransportProtocol::Unknown;
    }
    // new_unchecked: only the fixed header fields are read, and the size
    // guard above covers them
    match data[0] >> 4 {
        4 => Ipv4Packet::new_unchecked(data).next_header().into(),
        6 if data.len() >= IPV6_HEADER_SIZE => {
            Ipv6Packet::new_unchecked(data).next_header().into()
        }
        _ => TransportProtocol::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::packets::{ipv4_tcp, ipv4_udp, ipv6_udp};

    #[test]
    fn test_fill_derives_protocol() {
        let bytes = ipv4_tcp(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(8, 8, 8, 8), 40000, 443);
        let mut buf = PacketBuffer::new(DEFAULT_MTU);
        buf.as_mut_slice()[..bytes.len()].copy_from_slice(&bytes);
        let packet = buf.fill(bytes.len());

        assert_eq!(packet.len(), bytes.len());
        assert_eq!(packet.protocol(), TransportProtocol::Tcp);
        assert_eq!(
            packet.destination(),
            Some(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))
        );
        assert_eq!(packet.source(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
    }

    #[test]
    fn test_fill_clamps_to_capacity() {
        let packet = PacketBuffer::new(32).fill(9000);
        assert_eq!(packet.len(), 32);
    }

    #[test]
    fn test_short_packet_is_not_parsed() {
        let packet = Packet::from_bytes(&[0x45, 0, 0, 19]);
        assert_eq!(packet.protocol(), TransportProtocol::Unknown);
        assert_eq!(packet.ip_version(), None);
        assert_eq!(packet.destination(), None);
        assert_eq!(packet.source(), None);

        let empty = PacketBuffer::new(DEFAULT_MTU).fill(0);
        assert!(empty.is_empty());
        assert_eq!(empty.destination(), None);
    }

    #[test]
    fn test_ipv6_destination() {
        let dst: Ipv6Addr = "2001:db8::53".parse().unwrap();
        let packet = Packet::from_bytes(&ipv6_udp("fd00::2".parse().unwrap(), dst, 5353, 53));
        assert_eq!(packet.protocol(), TransportProtocol::Udp);
        assert_eq!(packet.destination(), Some(IpAddr::V6(dst)));
    }

    #[test]
    fn test_truncated_ipv6_header() {
        let mut bytes = vec![0u8; 30];
        bytes[0] = 0x60;
        let packet = Packet::from_bytes(&bytes);
        assert_eq!(packet.protocol(), TransportProtocol::Unknown);
        assert_eq!(packet.destination(), None);
    }

    #[test]
    fn test_other_protocol_and_unknown_version() {
        let mut icmp = ipv4_udp(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(1, 1, 1, 1), 1, 2);
        icmp[9] = 1;
        assert_eq!(
            Packet::from_bytes(&icmp).protocol(),
            TransportProtocol::Other(1)
        );

        let mut garbage = vec![0u8; 40];
        garbage[0] = 0x20;
        let packet = Packet::from_bytes(&garbage);
        assert_eq!(packet.protocol(), TransportProtocol::Unknown);
        assert_eq!(packet.destination(), None);
    }

    #[test]
    fn test_transport_payload() {
        let bytes = ipv4_udp(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(1, 1, 1, 1), 1234, 53);
        let packet = Packet::from_bytes(&bytes);
        let payload = packet.transport_payload().unwrap();
        assert_eq!(&payload[..2], &1234u16.to_be_bytes());
    }
}
