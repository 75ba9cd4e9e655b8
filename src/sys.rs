// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Owned wrappers around the Linux readiness primitives the scheduler is
//! built on: `epoll`, `eventfd` and `timerfd`.

use crate::poll::PollOp;
use bitflags::bitflags;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

bitflags! {
    /// Readiness bits exchanged with the multiplexer.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub(crate) struct Interest: u32 {
        const READ = libc::EPOLLIN as u32;
        const WRITE = libc::EPOLLOUT as u32;
        const ERROR = libc::EPOLLERR as u32;
        const READ_HUP = libc::EPOLLRDHUP as u32;
        const HUP = libc::EPOLLHUP as u32;
        const ONESHOT = libc::EPOLLONESHOT as u32;
    }
}

/// The readiness multiplexer.
#[derive(Debug)]
pub(crate) struct Epoll {
    fd: OwnedFd,
}

/// A counter descriptor used to inject readiness from any thread.
#[derive(Debug)]
pub(crate) struct EventFd {
    fd: OwnedFd,
}

/// A one-shot monotonic timer descriptor.
#[derive(Debug)]
pub(crate) struct TimerFd {
    fd: OwnedFd,
}

// === impl Interest ===

impl Interest {
    pub(crate) fn from_op(op: PollOp) -> Self {
        match op {
            PollOp::Read => Self::READ,
            PollOp::Write => Self::WRITE,
            PollOp::ReadWrite => Self::READ | Self::WRITE,
        }
    }
}

// === impl Epoll ===

impl Epoll {
    pub(crate) fn new() -> io::Result<Self> {
        // Safety: no pointer arguments.
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: `epoll_create1` returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    /// Registers `fd` with the given interest set and dispatch token.
    pub(crate) fn add(&self, fd: RawFd, interest: Interest, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };
        // Safety: `event` outlives the call; the kernel copies it.
        let rc = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &raw mut event)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn remove(&self, fd: RawFd) -> io::Result<()> {
        // Safety: a null event pointer is valid for EPOLL_CTL_DEL.
        let rc = unsafe {
            libc::epoll_ctl(
                self.fd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                core::ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Waits for events, retrying on `EINTR`. Returns the number of entries
    /// filled into `events`.
    pub(crate) fn wait(
        &self,
        events: &mut [libc::epoll_event],
        timeout_ms: i32,
    ) -> io::Result<usize> {
        loop {
            // Safety: `events` is a valid writable buffer of the given length.
            let rc = unsafe {
                libc::epoll_wait(
                    self.fd.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.len() as i32,
                    timeout_ms,
                )
            };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }
}

// === impl EventFd ===

impl EventFd {
    pub(crate) fn new() -> io::Result<Self> {
        // Safety: no pointer arguments.
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: `eventfd` returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    /// Bumps the counter, making the descriptor readable.
    pub(crate) fn signal(&self) {
        let value: u64 = 1;
        // Safety: writing 8 bytes from a valid u64.
        let rc = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&raw const value).cast(),
                size_of::<u64>(),
            )
        };
        if rc < 0 {
            tracing::error!(
                error = %io::Error::last_os_error(),
                "failed to signal eventfd"
            );
        }
    }

    /// Reads the counter back to zero. A `WouldBlock` result means the
    /// counter was already clear.
    pub(crate) fn drain(&self) {
        let mut value: u64 = 0;
        // Safety: reading 8 bytes into a valid u64.
        let rc = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&raw mut value).cast(),
                size_of::<u64>(),
            )
        };
        if rc < 0 {
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::WouldBlock {
                tracing::error!(%error, "failed to drain eventfd");
            }
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

// === impl TimerFd ===

impl TimerFd {
    pub(crate) fn new() -> io::Result<Self> {
        // Safety: no pointer arguments.
        let raw = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_CLOEXEC | libc::TFD_NONBLOCK,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: `timerfd_create` returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    /// Arms the timer to fire once after `delay`. A zero delay is clamped to
    /// one nanosecond: an all-zero `it_value` would disarm the timer instead
    /// of firing it immediately.
    pub(crate) fn set_oneshot(&self, delay: Duration) {
        let mut spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: delay.as_secs() as libc::time_t,
                tv_nsec: delay.subsec_nanos() as libc::c_long,
            },
        };
        if spec.it_value.tv_sec == 0 && spec.it_value.tv_nsec == 0 {
            spec.it_value.tv_nsec = 1;
        }
        self.settime(&spec);
    }

    /// Disarms the timer.
    pub(crate) fn disarm(&self) {
        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
        };
        self.settime(&spec);
    }

    /// Clears the expiration count after the descriptor signalled readiness.
    pub(crate) fn drain(&self) {
        let mut expirations: u64 = 0;
        // Safety: reading 8 bytes into a valid u64.
        let rc = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&raw mut expirations).cast(),
                size_of::<u64>(),
            )
        };
        if rc < 0 {
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::WouldBlock {
                tracing::error!(%error, "failed to drain timerfd");
            }
        }
    }

    fn settime(&self, spec: &libc::itimerspec) {
        // Safety: `spec` is a valid itimerspec for the duration of the call.
        let rc = unsafe {
            libc::timerfd_settime(self.fd.as_raw_fd(), 0, spec, core::ptr::null_mut())
        };
        if rc < 0 {
            tracing::error!(
                error = %io::Error::last_os_error(),
                "failed to set timerfd"
            );
        }
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
