//! Tunnel device abstraction
//!
//! The worker loop only needs three things from the virtual interface: a
//! descriptor to poll, a way to read one packet, and a way to close it.
//! `TunnelDevice` captures exactly that so the loop can run against the
//! Linux TUN device or a socketpair in tests.

pub mod tun;

use std::io;
use std::os::fd::BorrowedFd;

use crate::error::DeviceError;

pub use tun::{TunDevice, TunOpener};

/// Result of a single device read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A packet of the given length was read
    Packet(usize),
    /// Nothing was read this time (zero-length read, EAGAIN, EINTR)
    Empty,
}

/// A virtual network interface delivering raw IP packets.
pub trait TunnelDevice: Send + Sync + 'static {
    /// Descriptor to poll for read readiness, `None` once closed
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Read one packet into `buf`.
    ///
    /// `ReadOutcome::Empty` is not an error; the caller retries on the next
    /// poll cycle. Errors are fatal for the reading worker.
    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome, DeviceError>;

    /// Release the interface. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens a fresh device for each tunnel session.
pub trait DeviceFactory: Send + Sync + 'static {
    type Device: TunnelDevice;

    fn open(&self) -> Result<Self::Device, DeviceError>;
}

impl<F, D> DeviceFactory for F
where
    F: Fn() -> Result<D, DeviceError> + Send + Sync + 'static,
    D: TunnelDevice,
{
    type Device = D;

    fn open(&self) -> Result<D, DeviceError> {
        self()
    }
}

/// Map a raw read result onto the device read contract.
pub(crate) fn read_outcome(result: io::Result<usize>) -> Result<ReadOutcome, DeviceError> {
    match result {
        Ok(0) => Ok(ReadOutcome::Empty),
        Ok(n) => Ok(ReadOutcome::Packet(n)),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(ReadOutcome::Empty)
        }
        Err(e) => Err(DeviceError::ReadFailed(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_outcome_mapping() {
        assert_eq!(read_outcome(Ok(60)).unwrap(), ReadOutcome::Packet(60));
        assert_eq!(read_outcome(Ok(0)).unwrap(), ReadOutcome::Empty);
        assert_eq!(
            read_outcome(Err(io::ErrorKind::WouldBlock.into())).unwrap(),
            ReadOutcome::Empty
        );
        assert_eq!(
            read_outcome(Err(io::ErrorKind::Interrupted.into())).unwrap(),
            ReadOutcome::Empty
        );
        assert!(matches!(
            read_outcome(Err(io::Error::from_raw_os_error(nix::libc::EBADF))),
            Err(DeviceError::ReadFailed(_))
        ));
    }
}
