// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Transport of a [`Socket`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketType {
    Tcp,
    Udp,
}

/// An owned, nonblocking IPv4 socket.
///
/// Sockets are move-only: the descriptor has exactly one owner and is closed
/// on drop.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
}

// === impl SocketType ===

impl SocketType {
    fn raw(self) -> libc::c_int {
        match self {
            Self::Tcp => libc::SOCK_STREAM,
            Self::Udp => libc::SOCK_DGRAM,
        }
    }
}

// === impl Socket ===

impl Socket {
    /// Creates a nonblocking socket of the given type.
    ///
    /// # Errors
    ///
    /// Returns the kernel's error if socket creation fails.
    pub fn nonblocking(socket_type: SocketType) -> io::Result<Self> {
        // Safety: no pointer arguments.
        let raw = unsafe {
            libc::socket(
                libc::AF_INET,
                socket_type.raw() | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: `socket` returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    /// Creates a nonblocking TCP listener bound to `addr` with
    /// `SO_REUSEADDR` and `SO_REUSEPORT` set. Bind to port 0 for an
    /// ephemeral port, retrievable via [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns the kernel's error if any of socket creation, option setting,
    /// bind or listen fails.
    pub fn listener(addr: SocketAddrV4, backlog: i32) -> io::Result<Self> {
        let socket = Self::nonblocking(SocketType::Tcp)?;

        socket.set_option(libc::SO_REUSEADDR)?;
        socket.set_option(libc::SO_REUSEPORT)?;

        let sockaddr = sockaddr_from(addr);
        // Safety: `sockaddr` is a fully initialized sockaddr_in.
        let rc = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                (&raw const sockaddr).cast(),
                size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        // Safety: no pointer arguments.
        let rc = unsafe { libc::listen(socket.as_raw_fd(), backlog) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(socket)
    }

    pub(crate) fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// The address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns the kernel's error if `getsockname` fails.
    pub fn local_addr(&self) -> io::Result<SocketAddrV4> {
        // Safety: zeroed sockaddr_in is a valid byte pattern to be
        // overwritten by the kernel.
        let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
        // Safety: `sockaddr` and `len` are valid out-pointers.
        let rc = unsafe {
            libc::getsockname(
                self.as_raw_fd(),
                (&raw mut sockaddr).cast(),
                &raw mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sockaddr_to(&sockaddr))
    }

    fn set_option(&self, option: libc::c_int) -> io::Result<()> {
        let value: libc::c_int = 1;
        // Safety: `value` is a valid c_int for the duration of the call.
        let rc = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                (&raw const value).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Builds a `sockaddr_in`, converting the port to network byte order at this
/// boundary and nowhere else.
pub(crate) fn sockaddr_from(addr: SocketAddrV4) -> libc::sockaddr_in {
    // Safety: zeroed sockaddr_in is a valid all-fields-zero value; the
    // meaningful fields are filled in below.
    let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
    sockaddr.sin_port = addr.port().to_be();
    sockaddr.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(addr.ip().octets()),
    };
    sockaddr
}

/// Reads a `sockaddr_in` back, converting the port from network byte order
/// at this boundary and nowhere else.
pub(crate) fn sockaddr_to(sockaddr: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(sockaddr.sin_addr.s_addr.to_ne_bytes()),
        u16::from_be(sockaddr.sin_port),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_binds_ephemeral_port() {
        let listener =
            Socket::listener(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 128).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn sockaddr_round_trip_converts_port_once() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 7), 8080);
        let raw = sockaddr_from(addr);
        assert_eq!(sockaddr_to(&raw), addr);
    }

    #[test]
    fn udp_socket_creation() {
        Socket::nonblocking(SocketType::Udp).unwrap();
    }
}
