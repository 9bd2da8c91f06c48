//! Link-layer raw sockets bound to a single interface.
//!
//! Requires raw socket capabilities (root/CAP_NET_RAW).

use std::{
    future::Future,
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use nix::libc;
use pnet::datalink;
use thiserror::Error;
use tokio::io::unix::AsyncFd;

use crate::frame::FRAME_LEN;

/// `sll_pkttype` of frames transmitted by this host (linux/if_packet.h).
const PACKET_OUTGOING: u8 = 4;

/// Failure to obtain a bound raw socket.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),
    #[error("{op} on interface '{ifname}' failed: {source}")]
    Socket {
        ifname: String,
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Anything probes can be transmitted through.
pub trait FrameSink: Send + Sync {
    /// Waits until the link can take a frame, then transmits the frame `encode`
    /// produces.
    ///
    /// `encode` runs after every wait for writability, right before the frame is
    /// handed over, so a timestamp taken inside it excludes time spent blocked on
    /// a full send buffer. It may run more than once if the hand-off would block.
    fn send_frame_with<F>(&self, encode: F) -> impl Future<Output = io::Result<usize>> + Send
    where
        F: FnMut() -> io::Result<[u8; FRAME_LEN]> + Send;
}

/// Anything probes can be received from.
pub trait FrameSource: Send {
    /// Waits for the next frame and copies it into `buf`.
    ///
    /// Returns the real length of the frame, which may exceed `buf.len()` when the
    /// frame was truncated.
    fn recv_frame(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// An `AF_PACKET` socket bound to one interface and driven by tokio.
#[derive(Debug)]
pub struct RawSocket {
    fd: AsyncFd<OwnedFd>,
    ifname: String,
    ifindex: u32,
}

impl RawSocket {
    /// Opens a transmit-only socket on `ifname`.
    ///
    /// Protocol 0 means the kernel delivers no inbound traffic to this socket.
    pub fn open_egress(ifname: &str) -> Result<Self, TransportError> {
        Self::open(ifname, 0)
    }

    /// Opens a socket on `ifname` that only receives frames of `ether_type`.
    pub fn open_ingress(ifname: &str, ether_type: u16) -> Result<Self, TransportError> {
        Self::open(ifname, ether_type)
    }

    fn open(ifname: &str, ether_type: u16) -> Result<Self, TransportError> {
        let ifindex = resolve_ifindex(ifname)?;
        let socket_err = |op: &'static str| {
            let source = io::Error::last_os_error();
            TransportError::Socket {
                ifname: ifname.to_string(),
                op,
                source,
            }
        };

        let protocol = ether_type.to_be();
        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            )
        };
        if raw < 0 {
            return Err(socket_err("socket"));
        }
        // Owned from here on: any early return below closes the descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::c_ushort;
        sll.sll_protocol = protocol;
        sll.sll_ifindex = ifindex as libc::c_int;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(socket_err("bind"));
        }

        let fd = AsyncFd::new(fd).map_err(|source| TransportError::Socket {
            ifname: ifname.to_string(),
            op: "register",
            source,
        })?;

        log::info!(
            "Bound raw socket on {} (ifindex={}, ethertype={:#06x})",
            ifname,
            ifindex,
            ether_type
        );

        Ok(RawSocket {
            fd,
            ifname: ifname.to_string(),
            ifindex,
        })
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }
}

impl FrameSink for RawSocket {
    async fn send_frame_with<F>(&self, mut encode: F) -> io::Result<usize>
    where
        F: FnMut() -> io::Result<[u8; FRAME_LEN]> + Send,
    {
        loop {
            let mut guard = self.fd.writable().await?;
            let frame = encode()?;
            match guard.try_io(|inner| raw_send(inner.get_ref().as_raw_fd(), &frame)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

impl FrameSource for RawSocket {
    async fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| raw_recv(inner.get_ref().as_raw_fd(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn resolve_ifindex(ifname: &str) -> Result<u32, TransportError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == ifname)
        .map(|iface| iface.index)
        .ok_or_else(|| TransportError::InterfaceNotFound(ifname.to_string()))
}

fn raw_send(fd: RawFd, frame: &[u8]) -> io::Result<usize> {
    let ret = unsafe { libc::send(fd, frame.as_ptr() as *const libc::c_void, frame.len(), 0) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
}

fn raw_recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut from: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        let mut from_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

        // MSG_TRUNC makes packet sockets report the full frame length, so oversized
        // frames cannot pass as probes after being cut to the buffer size.
        let ret = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_TRUNC,
                &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut from_len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        // Frames this host transmits on the interface are looped back to packet
        // sockets too; only frames arriving from the wire count.
        if from.sll_pkttype == PACKET_OUTGOING {
            continue;
        }
        return Ok(ret as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_interface() {
        let err = RawSocket::open_egress("no-such-if0").unwrap_err();
        assert!(matches!(err, TransportError::InterfaceNotFound(ref name) if name == "no-such-if0"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Socket {
            ifname: "eth0".to_string(),
            op: "bind",
            source: io::Error::from_raw_os_error(libc::EPERM),
        };
        let text = err.to_string();
        assert!(text.starts_with("bind on interface 'eth0' failed"));
    }

    #[tokio::test]
    #[ignore = "needs CAP_NET_RAW"]
    async fn test_open_loopback_sockets() {
        let egress = RawSocket::open_egress("lo").unwrap();
        let ingress = RawSocket::open_ingress("lo", 0x0800).unwrap();
        assert_eq!(egress.ifindex(), ingress.ifindex());
        assert_eq!(ingress.ifname(), "lo");
    }
}
