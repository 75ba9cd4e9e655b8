// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::socket::{Socket, sockaddr_from, sockaddr_to};
use super::{ConnectStatus, RecvStatus, SendStatus};
use crate::io_scheduler::IoScheduler;
use crate::poll::{PollOp, PollStatus};
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

/// A cooperative TCP connection.
///
/// Obtained either by constructing + [`connect`](Self::connect)ing, or from
/// [`Server::accept`]. All readiness waits go through the owning scheduler;
/// `recv`/`send` are plain nonblocking calls that report
/// [`WouldBlock`](RecvStatus::WouldBlock) instead of suspending, so the
/// usual shape is poll-then-transfer.
#[derive(Debug)]
pub struct Client {
    scheduler: Arc<IoScheduler>,
    socket: Socket,
    remote: SocketAddrV4,
    connect_status: Option<ConnectStatus>,
}

/// A cooperative TCP listener.
#[derive(Debug)]
pub struct Server {
    scheduler: Arc<IoScheduler>,
    socket: Socket,
}

// === impl Client ===

impl Client {
    /// Creates an unconnected client targeting `remote`.
    ///
    /// # Errors
    ///
    /// Returns the kernel's error if socket creation fails.
    pub fn new(scheduler: Arc<IoScheduler>, remote: SocketAddrV4) -> io::Result<Self> {
        Ok(Self {
            scheduler,
            socket: Socket::nonblocking(super::SocketType::Tcp)?,
            remote,
            connect_status: None,
        })
    }

    fn accepted(scheduler: Arc<IoScheduler>, socket: Socket, remote: SocketAddrV4) -> Self {
        Self {
            scheduler,
            socket,
            remote,
            connect_status: Some(ConnectStatus::Connected),
        }
    }

    /// Establishes the connection, waiting up to `timeout` for the
    /// nonblocking connect to finish (a zero timeout waits indefinitely).
    /// The outcome is cached; repeated calls return it without reconnecting.
    pub async fn connect(&mut self, timeout: Duration) -> ConnectStatus {
        if let Some(status) = self.connect_status {
            return status;
        }

        let sockaddr = sockaddr_from(self.remote);
        // Safety: `sockaddr` is a fully initialized sockaddr_in.
        let rc = unsafe {
            libc::connect(
                self.socket.as_raw_fd(),
                (&raw const sockaddr).cast(),
                size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };

        let status = if rc == 0 {
            ConnectStatus::Connected
        } else {
            match io::Error::last_os_error().raw_os_error() {
                Some(libc::EINPROGRESS | libc::EAGAIN) => {
                    match self
                        .scheduler
                        .poll(self.socket.as_raw_fd(), PollOp::Write, timeout)
                        .await
                    {
                        PollStatus::Event => {
                            if self.take_socket_error() == 0 {
                                ConnectStatus::Connected
                            } else {
                                ConnectStatus::Error
                            }
                        }
                        PollStatus::Timeout => ConnectStatus::Timeout,
                        PollStatus::Error | PollStatus::Closed => ConnectStatus::Error,
                    }
                }
                _ => ConnectStatus::Error,
            }
        };

        tracing::trace!(remote = %self.remote, %status, "connect");
        self.connect_status = Some(status);
        status
    }

    /// Waits for this connection's descriptor to become ready for `op`.
    pub async fn poll(&self, op: PollOp, timeout: Duration) -> PollStatus {
        self.scheduler
            .poll(self.socket.as_raw_fd(), op, timeout)
            .await
    }

    /// Receives into `buf`; returns the status and the number of bytes
    /// received.
    pub fn recv(&self, buf: &mut [u8]) -> (RecvStatus, usize) {
        if buf.is_empty() {
            return (RecvStatus::Ok, 0);
        }

        // Safety: `buf` is a valid writable buffer of the given length.
        let received = unsafe {
            libc::recv(
                self.socket.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
            )
        };
        if received > 0 {
            (RecvStatus::Ok, received as usize)
        } else if received == 0 {
            (RecvStatus::Closed, 0)
        } else if io::Error::last_os_error().kind() == io::ErrorKind::WouldBlock {
            (RecvStatus::WouldBlock, 0)
        } else {
            (RecvStatus::Error, 0)
        }
    }

    /// Sends from `buf`; returns the status and the number of bytes the
    /// kernel accepted (possibly fewer than `buf.len()`).
    pub fn send(&self, buf: &[u8]) -> (SendStatus, usize) {
        if buf.is_empty() {
            return (SendStatus::Ok, 0);
        }

        // Safety: `buf` is a valid readable buffer of the given length.
        let sent = unsafe {
            libc::send(
                self.socket.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if sent >= 0 {
            (SendStatus::Ok, sent as usize)
        } else if io::Error::last_os_error().kind() == io::ErrorKind::WouldBlock {
            (SendStatus::WouldBlock, 0)
        } else {
            (SendStatus::Error, 0)
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn remote_addr(&self) -> SocketAddrV4 {
        self.remote
    }

    fn take_socket_error(&self) -> libc::c_int {
        let mut error: libc::c_int = 0;
        let mut len = size_of::<libc::c_int>() as libc::socklen_t;
        // Safety: `error` and `len` are valid out-pointers.
        let rc = unsafe {
            libc::getsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                (&raw mut error).cast(),
                &raw mut len,
            )
        };
        if rc < 0 {
            tracing::error!(
                error = %io::Error::last_os_error(),
                "getsockopt(SO_ERROR) failed after connect"
            );
            return -1;
        }
        error
    }
}

// === impl Server ===

impl Server {
    /// Creates a listener bound to `addr`.
    ///
    /// # Errors
    ///
    /// Returns the kernel's error if the listening socket cannot be set up.
    pub fn new(
        scheduler: Arc<IoScheduler>,
        addr: SocketAddrV4,
        backlog: i32,
    ) -> io::Result<Self> {
        Ok(Self {
            scheduler,
            socket: Socket::listener(addr, backlog)?,
        })
    }

    /// The bound address, with the ephemeral port resolved.
    ///
    /// # Errors
    ///
    /// Returns the kernel's error if `getsockname` fails.
    pub fn local_addr(&self) -> io::Result<SocketAddrV4> {
        self.socket.local_addr()
    }

    /// Waits for an incoming connection to be ready to accept.
    pub async fn poll(&self, timeout: Duration) -> PollStatus {
        self.scheduler
            .poll(self.socket.as_raw_fd(), PollOp::Read, timeout)
            .await
    }

    /// Accepts a pending connection as an already-connected [`Client`].
    ///
    /// # Errors
    ///
    /// Returns the kernel's error if `accept` fails, including
    /// `WouldBlock` when no connection is pending; poll first.
    pub fn accept(&self) -> io::Result<Client> {
        // Safety: zeroed sockaddr_in is a valid byte pattern to be
        // overwritten by the kernel.
        let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
        // Safety: `sockaddr` and `len` are valid out-pointers.
        let raw = unsafe {
            libc::accept4(
                self.socket.as_raw_fd(),
                (&raw mut sockaddr).cast(),
                &raw mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }

        // Safety: `accept4` returned a fresh descriptor we now own.
        let socket = Socket::from_owned(unsafe { OwnedFd::from_raw_fd(raw) });
        let remote = sockaddr_to(&sockaddr);
        tracing::trace!(%remote, "accepted connection");
        Ok(Client::accepted(Arc::clone(&self.scheduler), socket, remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_scheduler::{ExecutionStrategy, Options};
    use crate::sync_wait::sync_wait;
    use crate::task::Task;
    use crate::when_all::when_all;
    use std::net::Ipv4Addr;

    fn scheduler() -> Arc<IoScheduler> {
        IoScheduler::make_shared(Options {
            execution_strategy: ExecutionStrategy::ThreadInline,
            thread_count: 0,
        })
        .unwrap()
    }

    #[test]
    fn echo_round_trip() {
        let scheduler = scheduler();
        let server = Server::new(
            Arc::clone(&scheduler),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            128,
        )
        .unwrap();
        let addr = server.local_addr().unwrap();

        let server_task = Task::new(async move {
            assert_eq!(server.poll(Duration::from_secs(5)).await, PollStatus::Event);
            let peer = server.accept().unwrap();

            assert_eq!(
                peer.poll(PollOp::Read, Duration::from_secs(5)).await,
                PollStatus::Event
            );
            let mut buf = [0u8; 64];
            let (status, received) = peer.recv(&mut buf);
            assert_eq!(status, RecvStatus::Ok);

            assert_eq!(
                peer.poll(PollOp::Write, Duration::from_secs(5)).await,
                PollStatus::Event
            );
            let (status, sent) = peer.send(&buf[..received]);
            assert_eq!(status, SendStatus::Ok);
            assert_eq!(sent, received);
        });

        let client_task = Task::new({
            let scheduler = Arc::clone(&scheduler);
            async move {
                let mut client = Client::new(scheduler, addr).unwrap();
                assert_eq!(
                    client.connect(Duration::from_secs(5)).await,
                    ConnectStatus::Connected
                );

                assert_eq!(
                    client.poll(PollOp::Write, Duration::from_secs(5)).await,
                    PollStatus::Event
                );
                let (status, sent) = client.send(b"ping");
                assert_eq!(status, SendStatus::Ok);
                assert_eq!(sent, 4);

                assert_eq!(
                    client.poll(PollOp::Read, Duration::from_secs(5)).await,
                    PollStatus::Event
                );
                let mut buf = [0u8; 64];
                let (status, received) = client.recv(&mut buf);
                assert_eq!(status, RecvStatus::Ok);
                String::from_utf8_lossy(&buf[..received]).into_owned()
            }
        });

        let ((), echoed) = sync_wait(when_all((server_task, client_task)));
        assert_eq!(echoed, "ping");
    }

    #[test]
    fn connect_status_is_cached() {
        let scheduler = scheduler();
        let server = Server::new(
            Arc::clone(&scheduler),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            16,
        )
        .unwrap();
        let addr = server.local_addr().unwrap();

        let status = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                let mut client = Client::new(scheduler, addr).unwrap();
                let first = client.connect(Duration::from_secs(5)).await;
                let second = client.connect(Duration::from_secs(5)).await;
                (first, second)
            }
        });
        assert_eq!(status, (ConnectStatus::Connected, ConnectStatus::Connected));
    }

    #[test]
    fn recv_on_empty_connection_would_block() {
        let scheduler = scheduler();
        let server = Server::new(
            Arc::clone(&scheduler),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            16,
        )
        .unwrap();
        let addr = server.local_addr().unwrap();

        let status = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                let mut client = Client::new(scheduler, addr).unwrap();
                client.connect(Duration::from_secs(5)).await;
                let mut buf = [0u8; 8];
                let (status, received) = client.recv(&mut buf);
                assert_eq!(received, 0);
                status
            }
        });
        assert_eq!(status, RecvStatus::WouldBlock);
    }

    #[test]
    fn empty_buffers_short_circuit() {
        let scheduler = scheduler();
        let server = Server::new(
            Arc::clone(&scheduler),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            16,
        )
        .unwrap();
        let addr = server.local_addr().unwrap();

        sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                let mut client = Client::new(scheduler, addr).unwrap();
                client.connect(Duration::from_secs(5)).await;
                assert_eq!(client.recv(&mut []), (RecvStatus::Ok, 0));
                assert_eq!(client.send(&[]), (SendStatus::Ok, 0));
            }
        });
    }
}
