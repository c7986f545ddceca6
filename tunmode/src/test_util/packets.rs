//! IP packet builders for tests
//!
//! Uses smoltcp for header construction, the same wire types the packet
//! module parses with.

use std::net::{Ipv4Addr, Ipv6Addr};

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    IpAddress, IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr, Ipv6Address, Ipv6Packet, Ipv6Repr,
    TcpPacket, UdpPacket, UdpRepr,
};

/// IPv4 header size (without options)
pub const IPV4_HDR_SIZE: usize = 20;

/// IPv6 header size
pub const IPV6_HDR_SIZE: usize = 40;

/// TCP header size (without options)
pub const TCP_HDR_SIZE: usize = 20;

/// UDP header size
pub const UDP_HDR_SIZE: usize = 8;

const PAYLOAD: &[u8] = b"tunmode";

/// Build an IPv4 TCP SYN carrying a short payload
pub fn ipv4_tcp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
    let tcp_len = TCP_HDR_SIZE + PAYLOAD.len();
    let mut packet = vec![0u8; IPV4_HDR_SIZE + tcp_len];

    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from(src),
        dst_addr: Ipv4Address::from(dst),
        next_header: IpProtocol::Tcp,
        payload_len: tcp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(&mut packet[..]);
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());

    write_tcp(
        ip_packet.payload_mut(),
        src_port,
        dst_port,
        &IpAddress::from(ip_repr.src_addr),
        &IpAddress::from(ip_repr.dst_addr),
    );
    packet
}

/// Build an IPv4 UDP datagram carrying a short payload
pub fn ipv4_udp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
    let udp_len = UDP_HDR_SIZE + PAYLOAD.len();
    let mut packet = vec![0u8; IPV4_HDR_SIZE + udp_len];

    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from(src),
        dst_addr: Ipv4Address::from(dst),
        next_header: IpProtocol::Udp,
        payload_len: udp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(&mut packet[..]);
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());

    write_udp(
        ip_packet.payload_mut(),
        src_port,
        dst_port,
        &IpAddress::from(ip_repr.src_addr),
        &IpAddress::from(ip_repr.dst_addr),
    );
    packet
}

/// Build an IPv4 ICMP packet (echo request header only)
pub fn ipv4_icmp(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let mut packet = vec![0u8; IPV4_HDR_SIZE + 8];

    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from(src),
        dst_addr: Ipv4Address::from(dst),
        next_header: IpProtocol::Icmp,
        payload_len: 8,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(&mut packet[..]);
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());
    // type 8 = echo request
    ip_packet.payload_mut()[0] = 8;
    packet
}

/// Build an IPv6 UDP datagram carrying a short payload
pub fn ipv6_udp(src: Ipv6Addr, dst: Ipv6Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
    let udp_len = UDP_HDR_SIZE + PAYLOAD.len();
    let mut packet = vec![0u8; IPV6_HDR_SIZE + udp_len];

    let ip_repr = Ipv6Repr {
        src_addr: Ipv6Address::from(src),
        dst_addr: Ipv6Address::from(dst),
        next_header: IpProtocol::Udp,
        payload_len: udp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv6Packet::new_unchecked(&mut packet[..]);
    ip_repr.emit(&mut ip_packet);

    write_udp(
        ip_packet.payload_mut(),
        src_port,
        dst_port,
        &IpAddress::from(ip_repr.src_addr),
        &IpAddress::from(ip_repr.dst_addr),
    );
    packet
}

/// Build an IPv6 TCP SYN carrying a short payload
pub fn ipv6_tcp(src: Ipv6Addr, dst: Ipv6Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
    let tcp_len = TCP_HDR_SIZE + PAYLOAD.len();
    let mut packet = vec![0u8; IPV6_HDR_SIZE + tcp_len];

    let ip_repr = Ipv6Repr {
        src_addr: Ipv6Address::from(src),
        dst_addr: Ipv6Address::from(dst),
        next_header: IpProtocol::Tcp,
        payload_len: tcp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv6Packet::new_unchecked(&mut packet[..]);
    ip_repr.emit(&mut ip_packet);

    write_tcp(
        ip_packet.payload_mut(),
        src_port,
        dst_port,
        &IpAddress::from(ip_repr.src_addr),
        &IpAddress::from(ip_repr.dst_addr),
    );
    packet
}

fn write_tcp(buf: &mut [u8], src_port: u16, dst_port: u16, src: &IpAddress, dst: &IpAddress) {
    let mut tcp = TcpPacket::new_unchecked(buf);
    tcp.set_src_port(src_port);
    tcp.set_dst_port(dst_port);
    tcp.set_seq_number(smoltcp::wire::TcpSeqNumber(1));
    tcp.set_ack_number(smoltcp::wire::TcpSeqNumber(0));
    tcp.set_header_len(TCP_HDR_SIZE as u8);
    tcp.clear_flags();
    tcp.set_syn(true);
    tcp.set_window_len(65535);
    tcp.set_urgent_at(0);
    tcp.payload_mut().copy_from_slice(PAYLOAD);
    tcp.fill_checksum(src, dst);
}

fn write_udp(buf: &mut [u8], src_port: u16, dst_port: u16, src: &IpAddress, dst: &IpAddress) {
    let udp_repr = UdpRepr { src_port, dst_port };
    let mut udp_packet = UdpPacket::new_unchecked(buf);
    udp_repr.emit(
        &mut udp_packet,
        src,
        dst,
        PAYLOAD.len(),
        |payload| payload.copy_from_slice(PAYLOAD),
        &ChecksumCapabilities::default(),
    );
}
