// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Nonblocking sockets and the cooperative TCP client/server built on the
//! [`IoScheduler`](crate::io_scheduler::IoScheduler).

pub mod socket;
pub mod tcp;

use core::fmt;

pub use socket::{Socket, SocketType};

/// Outcome of [`tcp::Client::connect`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ConnectStatus {
    Connected,
    Timeout,
    Error,
}

/// Outcome of [`tcp::Client::recv`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RecvStatus {
    /// Bytes were received.
    Ok,
    /// The peer performed an orderly shutdown.
    Closed,
    /// The socket has no data; poll for read readiness and retry.
    WouldBlock,
    /// The kernel reported an error.
    Error,
}

/// Outcome of [`tcp::Client::send`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SendStatus {
    /// Bytes were accepted by the kernel (possibly fewer than offered).
    Ok,
    /// The send buffer is full; poll for write readiness and retry.
    WouldBlock,
    /// The kernel reported an error.
    Error,
}

// === impl ConnectStatus ===

impl ConnectStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// === impl RecvStatus ===

impl RecvStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Closed => "closed",
            Self::WouldBlock => "would_block",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RecvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// === impl SendStatus ===

impl SendStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::WouldBlock => "would_block",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
