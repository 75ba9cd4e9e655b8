// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::poll_info::PollInfo;
use crate::sys::TimerFd;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Position of an entry in the timer queue. The sequence number makes keys
/// unique so multiple waits sharing an exact deadline coexist (the queue is
/// a multimap in all but name).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct TimerKey {
    deadline: Instant,
    seq: u64,
}

/// Deadline-ordered queue of pending waits, backed by the scheduler's
/// timerfd.
///
/// The timerfd is always programmed for the earliest entry: inserting a new
/// front or removing the current front reprograms it, and an empty queue
/// disarms it.
#[derive(Debug)]
pub(crate) struct TimerQueue {
    timer_fd: TimerFd,
    entries: Mutex<BTreeMap<TimerKey, Arc<PollInfo>>>,
    next_seq: AtomicU64,
}

// === impl TimerQueue ===

impl TimerQueue {
    pub(crate) fn new(timer_fd: TimerFd) -> Self {
        Self {
            timer_fd,
            entries: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn timer_fd(&self) -> &TimerFd {
        &self.timer_fd
    }

    /// Queues `info` to expire at `deadline` and returns the entry's key so
    /// the I/O path can remove it if the descriptor fires first.
    pub(crate) fn insert(&self, deadline: Instant, info: &Arc<PollInfo>) -> TimerKey {
        let key = TimerKey {
            deadline,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let mut entries = self.entries.lock();
        entries.insert(key, Arc::clone(info));

        // a new earliest deadline moves the timerfd forward
        if entries.first_key_value().map(|(first, _)| *first) == Some(key) {
            self.program(&entries);
        }
        key
    }

    /// Removes a pending entry, reprogramming the timerfd if the earliest
    /// deadline went away.
    pub(crate) fn remove(&self, key: TimerKey) {
        let mut entries = self.entries.lock();
        let was_first = entries.first_key_value().map(|(first, _)| *first) == Some(key);
        if entries.remove(&key).is_some() && was_first {
            self.program(&entries);
        }
    }

    /// Pops every entry whose deadline is at or before `now`, in deadline
    /// order.
    pub(crate) fn pop_expired(&self, now: Instant) -> Vec<Arc<PollInfo>> {
        let mut entries = self.entries.lock();
        let mut expired = Vec::new();
        while let Some((key, _)) = entries.first_key_value() {
            if key.deadline > now {
                break;
            }
            let (_, info) = entries.pop_first().expect("non-empty after first_key_value");
            expired.push(info);
        }
        expired
    }

    /// Re-arms the timerfd for the current earliest entry (or disarms it).
    pub(crate) fn reprogram(&self) {
        let entries = self.entries.lock();
        self.program(&entries);
    }

    fn program(&self, entries: &BTreeMap<TimerKey, Arc<PollInfo>>) {
        match entries.first_key_value() {
            Some((key, _)) => {
                let delay = key
                    .deadline
                    .checked_duration_since(Instant::now())
                    .unwrap_or(Duration::ZERO);
                self.timer_fd.set_oneshot(delay);
            }
            None => self.timer_fd.disarm(),
        }
    }
}
