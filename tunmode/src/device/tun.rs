//! Linux TUN device
//!
//! Layer 3 TUN device (raw IP packets, no Ethernet header, `IFF_NO_PI`).
//! The device is either created here via `/dev/net/tun` or adopted from a
//! descriptor the host already established (the Android `VpnService` model).

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Mutex;

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::libc;
use tracing::{debug, info};

use super::{DeviceFactory, ReadOutcome, TunnelDevice, read_outcome};
use crate::error::DeviceError;

/// TUN device flags from linux/if_tun.h
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

/// ioctl request code for TUNSETIFF
const TUNSETIFF: libc::c_ulong = 0x400454ca;

/// ifreq structure for TUN device configuration and interface flags
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

impl IfReq {
    fn new(name: &str, flags: libc::c_short) -> Result<Self, DeviceError> {
        let name_bytes = name.as_bytes();
        if name_bytes.len() >= libc::IFNAMSIZ {
            return Err(DeviceError::NameTooLong(name.to_string()));
        }
        let mut ifr = IfReq {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: flags,
            _pad: [0; 22],
        };
        for (i, &b) in name_bytes.iter().enumerate() {
            ifr.ifr_name[i] = b as libc::c_char;
        }
        Ok(ifr)
    }
}

/// A non-blocking TUN device
pub struct TunDevice {
    name: String,
    /// `None` once closed
    file: Option<File>,
}

impl TunDevice {
    /// Create (or attach to) the TUN interface `name`.
    pub fn create(name: &str) -> Result<Self, DeviceError> {
        let ifr = IfReq::new(name, IFF_TUN | IFF_NO_PI)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")
            .map_err(DeviceError::Open)?;

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &ifr) };
        if ret < 0 {
            return Err(DeviceError::Configure(
                name.to_string(),
                std::io::Error::last_os_error(),
            ));
        }

        info!(name, "TUN device created");
        Ok(Self {
            name: name.to_string(),
            file: Some(file),
        })
    }

    /// Adopt a TUN descriptor established by the host.
    pub fn from_fd(name: &str, fd: OwnedFd) -> Result<Self, DeviceError> {
        let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL)
            .map_err(|e| DeviceError::Configure(name.to_string(), e.into()))?;
        let new_flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd.as_fd(), FcntlArg::F_SETFL(new_flags))
            .map_err(|e| DeviceError::Configure(name.to_string(), e.into()))?;

        info!(name, fd = fd.as_raw_fd(), "Adopted TUN descriptor");
        Ok(Self {
            name: name.to_string(),
            file: Some(File::from(fd)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bring the interface up (`ip link set <name> up`) via socket ioctls.
    pub fn bring_up(&self) -> Result<(), DeviceError> {
        let configure_err = |e| DeviceError::Configure(self.name.clone(), e);

        let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if sock < 0 {
            return Err(configure_err(std::io::Error::last_os_error()));
        }
        let sock_guard = SockGuard(sock);

        let mut ifr = IfReq::new(&self.name, 0)?;

        let ret = unsafe { libc::ioctl(sock_guard.0, libc::SIOCGIFFLAGS as _, &mut ifr) };
        if ret < 0 {
            return Err(configure_err(std::io::Error::last_os_error()));
        }

        ifr.ifr_flags |= libc::IFF_UP as libc::c_short;

        let ret = unsafe { libc::ioctl(sock_guard.0, libc::SIOCSIFFLAGS as _, &ifr) };
        if ret < 0 {
            return Err(configure_err(std::io::Error::last_os_error()));
        }

        info!(name = %self.name, "Interface set UP");
        Ok(())
    }
}

impl TunnelDevice for TunDevice {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.file.as_ref().map(|f| f.as_fd())
    }

    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        let mut file = self.file.as_ref().ok_or(DeviceError::Closed)?;
        read_outcome(file.read(buf))
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(name = %self.name, "TUN device closed");
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// RAII guard for socket fd
struct SockGuard(RawFd);

impl Drop for SockGuard {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// Device factory for the CLI: creates the named TUN device, or adopts a
/// host-provided descriptor once.
pub struct TunOpener {
    name: String,
    bring_up: bool,
    fd: Mutex<Option<OwnedFd>>,
}

impl TunOpener {
    pub fn new(name: impl Into<String>, bring_up: bool) -> Self {
        Self {
            name: name.into(),
            bring_up,
            fd: Mutex::new(None),
        }
    }

    /// Use `fd` for the next open instead of creating the interface.
    pub fn with_fd(self, fd: OwnedFd) -> Self {
        *self.fd.lock().unwrap_or_else(|e| e.into_inner()) = Some(fd);
        self
    }
}

impl DeviceFactory for TunOpener {
    type Device = TunDevice;

    fn open(&self) -> Result<TunDevice, DeviceError> {
        let adopted = self.fd.lock().unwrap_or_else(|e| e.into_inner()).take();
        let device = match adopted {
            Some(fd) => TunDevice::from_fd(&self.name, fd)?,
            None => TunDevice::create(&self.name)?,
        };
        if self.bring_up {
            device.bring_up()?;
        }
        debug!(name = device.name(), bring_up = self.bring_up, "TUN device ready");
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_too_long() {
        assert!(matches!(
            TunDevice::create("this-name-is-way-too-long"),
            Err(DeviceError::NameTooLong(_))
        ));
        assert!(IfReq::new("tunmode0", IFF_TUN).is_ok());
    }

    #[test]
    fn test_from_fd_read_and_close() {
        let (a, b) = std::os::unix::net::UnixDatagram::pair().unwrap();
        let mut device = TunDevice::from_fd("tun-test", OwnedFd::from(a)).unwrap();
        assert!(device.is_open());
        assert_eq!(device.name(), "tun-test");

        let mut buf = [0u8; 64];
        assert_eq!(device.read(&mut buf).unwrap(), ReadOutcome::Empty);

        b.send(&[0x45; 24]).unwrap();
        assert_eq!(device.read(&mut buf).unwrap(), ReadOutcome::Packet(24));

        device.close();
        device.close();
        assert!(!device.is_open());
        assert!(device.poll_fd().is_none());
        assert!(matches!(device.read(&mut buf), Err(DeviceError::Closed)));
    }

    #[test]
    fn test_opener_adopts_fd_once() {
        let (a, b) = std::os::unix::net::UnixDatagram::pair().unwrap();
        let opener = TunOpener::new("tun-adopt", false).with_fd(OwnedFd::from(a));

        let device = opener.open().unwrap();
        assert_eq!(device.name(), "tun-adopt");
        assert!(device.is_open());

        b.send(&[0x45; 20]).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(device.read(&mut buf).unwrap(), ReadOutcome::Packet(20));
    }

    // Note: creating a real TUN device requires CAP_NET_ADMIN
}
