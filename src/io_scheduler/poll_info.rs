// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::timer::TimerKey;
use crate::poll::PollStatus;
use core::fmt;
use core::task::Waker;
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const PENDING: u8 = 0;
const EVENT: u8 = 1;
const TIMEOUT: u8 = 2;
const ERROR: u8 = 3;
const CLOSED: u8 = 4;

/// Per-wait record shared between a suspended poll future and the scheduler.
///
/// The record is the synchronization point of the I/O-versus-timeout race:
/// `state` moves from pending to exactly one terminal status through a
/// single compare-exchange, and only the winning path may deregister the
/// descriptor, remove the other path's entry, and wake the suspended task.
/// The waker is registered before the record is armed, so a completion can
/// never observe a record without a continuation.
pub(crate) struct PollInfo {
    fd: Option<RawFd>,
    state: AtomicU8,
    waker: AtomicWaker,
    /// Where the other completion path can find us: the timer-queue entry
    /// and the epoll token registry slot.
    links: Mutex<Links>,
}

#[derive(Default)]
struct Links {
    timer_key: Option<TimerKey>,
    token: Option<usize>,
}

// === impl PollInfo ===

impl PollInfo {
    pub(crate) fn for_fd(fd: RawFd) -> Arc<Self> {
        Arc::new(Self {
            fd: Some(fd),
            state: AtomicU8::new(PENDING),
            waker: AtomicWaker::new(),
            links: Mutex::new(Links::default()),
        })
    }

    pub(crate) fn for_timer() -> Arc<Self> {
        Arc::new(Self {
            fd: None,
            state: AtomicU8::new(PENDING),
            waker: AtomicWaker::new(),
            links: Mutex::new(Links::default()),
        })
    }

    pub(crate) fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// Attempts to move the record from pending to `status`. Returns `true`
    /// iff this call won the race; the winner owns cleanup and wakeup.
    pub(crate) fn claim(&self, status: PollStatus) -> bool {
        self.state
            .compare_exchange(
                PENDING,
                encode(status),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The terminal status, once a path has claimed the record.
    pub(crate) fn status(&self) -> Option<PollStatus> {
        decode(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn register_waker(&self, waker: &Waker) {
        self.waker.register(waker);
    }

    pub(crate) fn take_waker(&self) -> Option<Waker> {
        self.waker.take()
    }

    pub(crate) fn set_timer_key(&self, key: TimerKey) {
        self.links.lock().timer_key = Some(key);
    }

    pub(crate) fn take_timer_key(&self) -> Option<TimerKey> {
        self.links.lock().timer_key.take()
    }

    pub(crate) fn set_token(&self, token: usize) {
        self.links.lock().token = Some(token);
    }

    pub(crate) fn take_token(&self) -> Option<usize> {
        self.links.lock().token.take()
    }
}

impl fmt::Debug for PollInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollInfo")
            .field("fd", &self.fd)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn encode(status: PollStatus) -> u8 {
    match status {
        PollStatus::Event => EVENT,
        PollStatus::Timeout => TIMEOUT,
        PollStatus::Error => ERROR,
        PollStatus::Closed => CLOSED,
    }
}

fn decode(state: u8) -> Option<PollStatus> {
    match state {
        PENDING => None,
        EVENT => Some(PollStatus::Event),
        TIMEOUT => Some(PollStatus::Timeout),
        ERROR => Some(PollStatus::Error),
        CLOSED => Some(PollStatus::Closed),
        _ => unreachable!("invalid poll state {state}"),
    }
}
