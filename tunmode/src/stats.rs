//! Per-session packet counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct TunnelStats {
    packets_read: AtomicU64,
    empty_reads: AtomicU64,
    unparsed: AtomicU64,
    blocked: AtomicU64,
    dispatched_tcp: AtomicU64,
    dispatched_udp: AtomicU64,
    unsupported: AtomicU64,
}

/// Point-in-time copy of [`TunnelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub packets_read: u64,
    pub empty_reads: u64,
    pub unparsed: u64,
    pub blocked: u64,
    pub dispatched_tcp: u64,
    pub dispatched_udp: u64,
    pub unsupported: u64,
}

impl StatsSnapshot {
    pub fn dispatched(&self) -> u64 {
        self.dispatched_tcp + self.dispatched_udp
    }
}

impl TunnelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn packet_read(&self) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn empty_read(&self) {
        self.empty_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unparsed_packet(&self) {
        self.unparsed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dispatched_tcp(&self) {
        self.dispatched_tcp.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dispatched_udp(&self) {
        self.dispatched_udp.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unsupported(&self) {
        self.unsupported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            empty_reads: self.empty_reads.load(Ordering::Relaxed),
            unparsed: self.unparsed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            dispatched_tcp: self.dispatched_tcp.load(Ordering::Relaxed),
            dispatched_udp: self.dispatched_udp.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
        }
    }
}
