//! Packet I/O over AF_PACKET raw sockets.
//!
//! Each router port owns one socket bound to its interface and switched
//! into promiscuous mode for the socket's lifetime. Reads and writes go
//! through tokio's AsyncFd so a single task can multiplex every port.

use crate::{Error, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;

/// A bound, promiscuous AF_PACKET socket for one interface.
pub struct AfPacketSocket {
    fd: AsyncFd<RawFd>,
    ifindex: i32,
}

impl AfPacketSocket {
    /// Open a raw socket bound to `ifname`, non-blocking and promiscuous.
    pub fn bind(ifname: &str) -> Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be() as i32;
        let raw = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol) };
        if raw < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        // Close the fd on any failure past this point
        let setup = |raw: RawFd| -> Result<i32> {
            let ifindex = ifindex_of(raw, ifname)?;

            let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            addr.sll_family = libc::AF_PACKET as u16;
            addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
            addr.sll_ifindex = ifindex;
            let rc = unsafe {
                libc::bind(
                    raw,
                    &addr as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as u32,
                )
            };
            if rc < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
            if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            set_promiscuous(raw, ifindex, true)?;
            Ok(ifindex)
        };

        let ifindex = match setup(raw) {
            Ok(idx) => idx,
            Err(e) => {
                unsafe { libc::close(raw) };
                return Err(e);
            }
        };

        match AsyncFd::new(raw) {
            Ok(fd) => Ok(Self { fd, ifindex }),
            Err(e) => {
                unsafe { libc::close(raw) };
                Err(Error::Io(e))
            }
        }
    }

    /// Wait for and read one frame into `buf`, returning its length.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.readable_mut().await.map_err(Error::Io)?;
            let attempt = guard.try_io(|inner| {
                let n = unsafe {
                    libc::recv(*inner.get_ref(), buf.as_mut_ptr() as *mut _, buf.len(), 0)
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match attempt {
                Ok(result) => return result.map_err(Error::Io),
                // Readiness was spurious; park again
                Err(_) => continue,
            }
        }
    }

    /// Write one frame, returning the number of bytes queued.
    pub async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.writable_mut().await.map_err(Error::Io)?;
            let attempt = guard.try_io(|inner| {
                let n = unsafe {
                    libc::send(*inner.get_ref(), buf.as_ptr() as *const _, buf.len(), 0)
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match attempt {
                Ok(result) => return result.map_err(Error::Io),
                Err(_) => continue,
            }
        }
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        *self.fd.get_ref()
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        let raw = *self.fd.get_ref();
        let _ = set_promiscuous(raw, self.ifindex, false);
        unsafe { libc::close(raw) };
    }
}

/// Resolve an interface name to its kernel index via SIOCGIFINDEX.
fn ifindex_of(fd: RawFd, ifname: &str) -> Result<i32> {
    let not_found = || Error::InterfaceNotFound {
        name: ifname.to_string(),
    };

    let name = CString::new(ifname).map_err(|_| not_found())?;
    let bytes = name.as_bytes_with_nul();

    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    if bytes.len() > req.ifr_name.len() {
        return Err(not_found());
    }
    for (dst, src) in req.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    if unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut req) } < 0 {
        return Err(not_found());
    }
    Ok(unsafe { req.ifr_ifru.ifru_ifindex })
}

fn set_promiscuous(fd: RawFd, ifindex: i32, enable: bool) -> Result<()> {
    let mreq = libc::packet_mreq {
        mr_ifindex: ifindex,
        mr_type: libc::PACKET_MR_PROMISC as u16,
        mr_alen: 0,
        mr_address: [0; 8],
    };
    let opt = if enable {
        libc::PACKET_ADD_MEMBERSHIP
    } else {
        libc::PACKET_DROP_MEMBERSHIP
    };

    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            opt,
            &mreq as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::packet_mreq>() as u32,
        )
    };
    if rc < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(())
}
