//! Test utilities
//!
//! A socketpair-backed tunnel device plus recording session managers and
//! notifiers, so the full worker and controller paths run without
//! CAP_NET_ADMIN. Datagram sockets preserve packet boundaries the same way
//! a TUN descriptor does.

pub mod packets;

use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::bridge::HostNotifier;
use crate::controller::TunnelState;
use crate::device::{DeviceFactory, ReadOutcome, TunnelDevice, read_outcome};
use crate::dispatch::SessionManager;
use crate::error::DeviceError;
use crate::packet::Packet;

/// Fake tunnel device reading from one end of a datagram socketpair.
pub struct PairDevice {
    sock: Option<UnixDatagram>,
    closed: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl PairDevice {
    /// Create the device and the peer socket tests inject packets through.
    pub fn pair() -> io::Result<(Self, UnixDatagram)> {
        let (sock, peer) = UnixDatagram::pair()?;
        sock.set_nonblocking(true)?;
        let device = Self {
            sock: Some(sock),
            closed: Arc::new(AtomicBool::new(false)),
            fail_reads: Arc::new(AtomicBool::new(false)),
        };
        Ok((device, peer))
    }

    /// Second handle on the device socket. Shutting it down makes the
    /// device report a hangup to poll.
    pub fn hangup_handle(&self) -> io::Result<UnixDatagram> {
        match &self.sock {
            Some(sock) => sock.try_clone(),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Once raised, every read fails with EIO while the socket still polls
    /// readable for queued packets.
    pub fn read_failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_reads)
    }

    /// Flag set once the device has been closed.
    pub fn close_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl TunnelDevice for PairDevice {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.sock.as_ref().map(|s| s.as_fd())
    }

    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        let sock = self.sock.as_ref().ok_or(DeviceError::Closed)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DeviceError::ReadFailed(io::Error::from_raw_os_error(
                nix::libc::EIO,
            )));
        }
        read_outcome(sock.recv(buf))
    }

    fn close(&mut self) {
        if self.sock.take().is_some() {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.sock.is_some()
    }
}

/// Hands out one pre-built [`PairDevice`]; later opens fail.
pub struct PairFactory {
    device: Mutex<Option<PairDevice>>,
}

impl PairFactory {
    pub fn new(device: PairDevice) -> Self {
        Self {
            device: Mutex::new(Some(device)),
        }
    }
}

impl DeviceFactory for PairFactory {
    type Device = PairDevice;

    fn open(&self) -> Result<PairDevice, DeviceError> {
        self.device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| DeviceError::Open(io::ErrorKind::NotFound.into()))
    }
}

/// Factory whose every open fails
pub struct FailingFactory;

impl DeviceFactory for FailingFactory {
    type Device = PairDevice;

    fn open(&self) -> Result<PairDevice, DeviceError> {
        Err(DeviceError::Open(io::Error::from_raw_os_error(
            nix::libc::ENODEV,
        )))
    }
}

/// Session manager that keeps every packet it is handed.
#[derive(Default)]
pub struct RecordingSessions {
    packets: Mutex<Vec<Packet>>,
}

impl RecordingSessions {
    pub fn packets(&self) -> Vec<Packet> {
        self.packets.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.packets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SessionManager for RecordingSessions {
    fn handle(&self, packet: Packet) {
        self.packets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(packet);
    }
}

/// Notifier that records every callback.
#[derive(Default)]
pub struct RecordingNotifier {
    closed: AtomicUsize,
    states: Mutex<Vec<TunnelState>>,
}

impl RecordingNotifier {
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn states(&self) -> Vec<TunnelState> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl HostNotifier for RecordingNotifier {
    fn on_tunnel_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_state_changed(&self, state: TunnelState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(state);
    }
}
