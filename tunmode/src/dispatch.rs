//! Protocol dispatch to the session managers
//!
//! Packets that pass the blocklist are handed to the TCP or UDP session
//! manager. Every other protocol is dropped here without error.

use std::sync::Arc;

use tracing::trace;

use crate::packet::{Packet, TransportProtocol};

/// Stateful handler for one transport protocol's traffic.
///
/// Handoff is fire-and-forget: the manager owns the packet from here on.
pub trait SessionManager: Send + Sync {
    fn handle(&self, packet: Packet);
}

/// Where a packet went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Tcp,
    Udp,
    Unsupported,
}

/// Routes packets by protocol tag.
#[derive(Clone)]
pub struct Dispatcher {
    tcp: Arc<dyn SessionManager>,
    udp: Arc<dyn SessionManager>,
}

impl Dispatcher {
    pub fn new(tcp: Arc<dyn SessionManager>, udp: Arc<dyn SessionManager>) -> Self {
        Self { tcp, udp }
    }

    pub fn dispatch(&self, packet: Packet) -> Dispatched {
        match packet.protocol() {
            TransportProtocol::Tcp => {
                self.tcp.handle(packet);
                Dispatched::Tcp
            }
            TransportProtocol::Udp => {
                self.udp.handle(packet);
                Dispatched::Udp
            }
            other => {
                trace!(protocol = ?other, len = packet.len(), "Unsupported protocol, dropping");
                Dispatched::Unsupported
            }
        }
    }
}
