//! Tunnel worker loop
//!
//! Each worker polls the device with a bounded timeout, reads one packet per
//! readable event, checks its destination against the blocklist and hands
//! accepted packets to the dispatcher.
//!
//! Failure policy:
//! - poll errors (except EINTR) and `POLLERR`/`POLLHUP`/`POLLNVAL` end the worker
//! - read errors end the worker; empty reads are retried next cycle
//! - any other event set without `POLLIN` is "no data this cycle"
//!
//! Cancellation is only checked between poll calls, so shutdown latency is
//! bounded by the poll timeout.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, error, info, trace, warn};

use crate::blocklist::Blocklist;
use crate::device::{ReadOutcome, TunnelDevice};
use crate::dispatch::{Dispatched, Dispatcher};
use crate::error::DeviceError;
use crate::packet::{Packet, PacketBuffer};
use crate::session::TunnelSession;

/// Everything a worker needs, handed over at spawn time.
pub struct WorkerContext<D: TunnelDevice> {
    pub index: usize,
    pub device: Arc<D>,
    pub session: Arc<TunnelSession>,
    pub blocklist: Arc<Blocklist>,
    pub dispatcher: Dispatcher,
    pub poll_timeout: Duration,
    pub mtu: usize,
}

/// Why a worker stopped
#[derive(Debug)]
pub enum WorkerExit {
    /// Cancellation flag observed
    Cancelled,
    /// poll() itself failed
    PollFailed(Errno),
    /// Error, hangup or invalid-descriptor event on the device
    HungUp(PollFlags),
    /// The device read failed
    ReadFailed(DeviceError),
    /// The device no longer has a descriptor
    DeviceClosed,
}

impl WorkerExit {
    pub fn is_error(&self) -> bool {
        !matches!(self, WorkerExit::Cancelled)
    }
}

/// Blocklist decision for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Destination is on the blocklist
    Blocked(IpAddr),
    /// Destination is not on the blocklist
    Pass,
    /// No destination could be extracted; never blocked
    Unparsed,
}

/// Check a packet's destination against the blocklist.
pub fn inspect(packet: &Packet, blocklist: &Blocklist) -> Verdict {
    match packet.destination() {
        Some(dst) if blocklist.contains(&dst.to_string()) => Verdict::Blocked(dst),
        Some(_) => Verdict::Pass,
        None => Verdict::Unparsed,
    }
}

enum Readiness {
    Readable,
    /// Timeout, EINTR, or events without POLLIN
    Idle,
    HungUp(PollFlags),
}

const FATAL_EVENTS: PollFlags = PollFlags::POLLERR
    .union(PollFlags::POLLHUP)
    .union(PollFlags::POLLNVAL);

fn wait_readable<D: TunnelDevice>(
    device: &D,
    timeout: PollTimeout,
) -> Result<Readiness, WorkerExit> {
    let fd = device.poll_fd().ok_or(WorkerExit::DeviceClosed)?;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

    match poll(&mut fds, timeout) {
        Ok(0) => Ok(Readiness::Idle),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.intersects(FATAL_EVENTS) {
                Ok(Readiness::HungUp(revents))
            } else if revents.contains(PollFlags::POLLIN) {
                Ok(Readiness::Readable)
            } else {
                Ok(Readiness::Idle)
            }
        }
        Err(Errno::EINTR) => Ok(Readiness::Idle),
        Err(e) => Err(WorkerExit::PollFailed(e)),
    }
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    i32::try_from(timeout.as_millis())
        .ok()
        .and_then(|ms| PollTimeout::try_from(ms).ok())
        .unwrap_or(PollTimeout::MAX)
}

impl<D: TunnelDevice> WorkerContext<D> {
    /// Filter and dispatch one packet.
    fn process(&self, packet: Packet) {
        let stats = self.session.stats();
        stats.packet_read();

        match inspect(&packet, &self.blocklist) {
            Verdict::Blocked(dst) => {
                stats.blocked();
                trace!(worker = self.index, %dst, len = packet.len(), "Blocked packet dropped");
                return;
            }
            Verdict::Unparsed => {
                stats.unparsed_packet();
                trace!(worker = self.index, len = packet.len(), "Packet too short to parse");
            }
            Verdict::Pass => {}
        }

        match self.dispatcher.dispatch(packet) {
            Dispatched::Tcp => stats.dispatched_tcp(),
            Dispatched::Udp => stats.dispatched_udp(),
            Dispatched::Unsupported => stats.unsupported(),
        }
    }
}

/// Run the worker loop until cancellation or a device failure.
pub fn run_worker<D: TunnelDevice>(ctx: WorkerContext<D>) -> WorkerExit {
    let session_id = ctx.session.id();
    let timeout = poll_timeout(ctx.poll_timeout);

    info!(%session_id, worker = ctx.index, "Tunnel worker started");

    let exit = loop {
        if ctx.session.is_cancelled() {
            break WorkerExit::Cancelled;
        }

        match wait_readable(ctx.device.as_ref(), timeout) {
            Ok(Readiness::Readable) => {}
            Ok(Readiness::Idle) => continue,
            Ok(Readiness::HungUp(revents)) => break WorkerExit::HungUp(revents),
            Err(exit) => break exit,
        }

        let mut buf = PacketBuffer::new(ctx.mtu);
        match ctx.device.read(buf.as_mut_slice()) {
            Ok(ReadOutcome::Packet(len)) => ctx.process(buf.fill(len)),
            Ok(ReadOutcome::Empty) => {
                ctx.session.stats().empty_read();
                debug!(%session_id, worker = ctx.index, "Empty read, retrying");
            }
            Err(e) => break WorkerExit::ReadFailed(e),
        }
    };

    match &exit {
        WorkerExit::Cancelled => {
            info!(%session_id, worker = ctx.index, "Tunnel worker stopped");
        }
        WorkerExit::HungUp(revents) => {
            warn!(%session_id, worker = ctx.index, ?revents, "Tunnel device hung up");
        }
        other => {
            error!(%session_id, worker = ctx.index, exit = ?other, "Tunnel worker failed");
        }
    }
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::packets::{ipv4_tcp, ipv4_udp, ipv6_udp};
    use crate::test_util::{PairDevice, RecordingSessions};
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::Instant;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    #[test]
    fn test_inspect() {
        let blocklist = Blocklist::new();
        blocklist.update("10.0.0.5, 2001:db8::53");

        let blocked = Packet::from_bytes(&ipv4_tcp(SRC, Ipv4Addr::new(10, 0, 0, 5), 1, 80));
        assert_eq!(
            inspect(&blocked, &blocklist),
            Verdict::Blocked("10.0.0.5".parse().unwrap())
        );

        let allowed = Packet::from_bytes(&ipv4_tcp(SRC, Ipv4Addr::new(8, 8, 8, 8), 1, 80));
        assert_eq!(inspect(&allowed, &blocklist), Verdict::Pass);

        let v6 = Packet::from_bytes(&ipv6_udp(
            "fd00::2".parse().unwrap(),
            "2001:db8::53".parse().unwrap(),
            1,
            53,
        ));
        assert!(matches!(inspect(&v6, &blocklist), Verdict::Blocked(_)));

        let short = Packet::from_bytes(&[0x45; 12]);
        assert_eq!(inspect(&short, &blocklist), Verdict::Unparsed);
    }

    #[test]
    fn test_inspect_empty_blocklist() {
        let blocklist = Blocklist::new();
        let packet = Packet::from_bytes(&ipv4_udp(SRC, Ipv4Addr::new(10, 0, 0, 5), 1, 53));
        assert_eq!(inspect(&packet, &blocklist), Verdict::Pass);
    }

    struct Harness {
        peer: std::os::unix::net::UnixDatagram,
        session: Arc<TunnelSession>,
        tcp: Arc<RecordingSessions>,
        udp: Arc<RecordingSessions>,
        fail_reads: Arc<std::sync::atomic::AtomicBool>,
        handle: thread::JoinHandle<WorkerExit>,
    }

    fn spawn(blocklist: Arc<Blocklist>) -> Harness {
        let (device, peer) = PairDevice::pair().unwrap();
        let fail_reads = device.read_failure_switch();
        let (session, _done) = TunnelSession::new();
        let tcp = Arc::new(RecordingSessions::default());
        let udp = Arc::new(RecordingSessions::default());
        let ctx = WorkerContext {
            index: 0,
            device: Arc::new(device),
            session: session.clone(),
            blocklist,
            dispatcher: Dispatcher::new(tcp.clone(), udp.clone()),
            poll_timeout: Duration::from_millis(20),
            mtu: 1500,
        };
        let handle = thread::spawn(move || run_worker(ctx));
        Harness {
            peer,
            session,
            tcp,
            udp,
            fail_reads,
            handle,
        }
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_worker_filters_and_dispatches() {
        let blocklist = Arc::new(Blocklist::new());
        blocklist.update("10.0.0.5");
        let h = spawn(blocklist);

        h.peer
            .send(&ipv4_tcp(SRC, Ipv4Addr::new(10, 0, 0, 5), 40000, 80))
            .unwrap();
        h.peer
            .send(&ipv4_tcp(SRC, Ipv4Addr::new(8, 8, 8, 8), 40001, 443))
            .unwrap();
        h.peer
            .send(&ipv4_udp(SRC, Ipv4Addr::new(1, 1, 1, 1), 5353, 53))
            .unwrap();
        h.peer.send(&[0x45, 0x00, 0x00]).unwrap();

        wait_for(|| h.session.stats().snapshot().packets_read == 4);
        h.session.cancel();
        let exit = h.handle.join().unwrap();
        assert!(matches!(exit, WorkerExit::Cancelled));

        let stats = h.session.stats().snapshot();
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.dispatched_tcp, 1);
        assert_eq!(stats.dispatched_udp, 1);
        assert_eq!(stats.unparsed, 1);
        assert_eq!(stats.unsupported, 1);
        assert_eq!(h.tcp.count(), 1);
        assert_eq!(h.udp.count(), 1);
        assert_eq!(
            h.tcp.packets()[0].destination(),
            Some("8.8.8.8".parse().unwrap())
        );
    }

    #[test]
    fn test_worker_sees_blocklist_replace() {
        let blocklist = Arc::new(Blocklist::new());
        let h = spawn(blocklist.clone());
        let dst = Ipv4Addr::new(9, 9, 9, 9);

        h.peer.send(&ipv4_udp(SRC, dst, 1, 53)).unwrap();
        wait_for(|| h.udp.count() == 1);

        blocklist.update("9.9.9.9");
        h.peer.send(&ipv4_udp(SRC, dst, 1, 53)).unwrap();
        wait_for(|| h.session.stats().snapshot().blocked == 1);

        h.session.cancel();
        h.handle.join().unwrap();
        assert_eq!(h.udp.count(), 1);
    }

    #[test]
    fn test_worker_exits_on_cancel_within_timeout() {
        let h = spawn(Arc::new(Blocklist::new()));
        thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        h.session.cancel();
        let exit = h.handle.join().unwrap();
        assert!(matches!(exit, WorkerExit::Cancelled));
        assert!(start.elapsed() < Duration::from_millis(500));
        drop(h.peer);
    }

    #[test]
    fn test_worker_stops_on_read_error() {
        let h = spawn(Arc::new(Blocklist::new()));
        h.fail_reads.store(true, std::sync::atomic::Ordering::SeqCst);
        h.peer
            .send(&ipv4_udp(SRC, Ipv4Addr::new(1, 1, 1, 1), 1, 53))
            .unwrap();

        let exit = h.handle.join().unwrap();
        assert!(matches!(exit, WorkerExit::ReadFailed(DeviceError::ReadFailed(_))));
        assert!(exit.is_error());
        assert!(!h.session.is_cancelled());
        assert_eq!(h.session.stats().snapshot().packets_read, 0);
        assert_eq!(h.udp.count(), 0);
    }

    #[test]
    fn test_poll_timeout_conversion() {
        assert_eq!(
            poll_timeout(Duration::from_millis(1000)),
            PollTimeout::try_from(1000i32).unwrap()
        );
        assert_eq!(
            poll_timeout(Duration::from_secs(u64::MAX / 2)),
            PollTimeout::MAX
        );
    }
}
