//! Flow-logging session manager used by the `tunmode` binary.

use smoltcp::wire::{TcpPacket, UdpPacket};
use tracing::debug;

use crate::dispatch::SessionManager;
use crate::packet::{Packet, TransportProtocol};

/// Logs every accepted packet with its addresses and ports, then drops it.
#[derive(Debug, Default)]
pub struct FlowLogger;

impl FlowLogger {
    pub fn new() -> Self {
        Self
    }
}

/// Source and destination ports of a TCP or UDP packet.
pub fn ports(packet: &Packet) -> Option<(u16, u16)> {
    let payload = packet.transport_payload()?;
    match packet.protocol() {
        TransportProtocol::Tcp => {
            let tcp = TcpPacket::new_checked(payload).ok()?;
            Some((tcp.src_port(), tcp.dst_port()))
        }
        TransportProtocol::Udp => {
            let udp = UdpPacket::new_checked(payload).ok()?;
            Some((udp.src_port(), udp.dst_port()))
        }
        _ => None,
    }
}

impl SessionManager for FlowLogger {
    fn handle(&self, packet: Packet) {
        let (src_port, dst_port) = ports(&packet).unwrap_or_default();
        debug!(
            protocol = packet.protocol().as_str(),
            src = ?packet.source(),
            dst = ?packet.destination(),
            src_port,
            dst_port,
            len = packet.len(),
            "Flow"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::packets::{ipv4_icmp, ipv4_tcp, ipv6_udp};
    use std::net::Ipv4Addr;

    #[test]
    fn test_ports() {
        let tcp = Packet::from_bytes(&ipv4_tcp(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(1, 1, 1, 1),
            40000,
            443,
        ));
        assert_eq!(ports(&tcp), Some((40000, 443)));

        let udp = Packet::from_bytes(&ipv6_udp(
            "fd00::2".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
            5353,
            53,
        ));
        assert_eq!(ports(&udp), Some((5353, 53)));

        let icmp = Packet::from_bytes(&ipv4_icmp(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(1, 1, 1, 1),
        ));
        assert_eq!(ports(&icmp), None);
    }

    #[test]
    fn test_handle_truncated_packet() {
        let mut bytes = ipv4_tcp(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(1, 1, 1, 1),
            40000,
            443,
        );
        bytes.truncate(24);
        FlowLogger::new().handle(Packet::from_bytes(&bytes));
    }
}
