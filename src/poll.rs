// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

/// Readiness interest for a [`poll`](crate::io_scheduler::IoScheduler::poll)
/// operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PollOp {
    Read,
    Write,
    ReadWrite,
}

/// Outcome of a readiness wait.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PollStatus {
    /// The descriptor became readable or writable.
    Event,
    /// The wait's timeout elapsed before the descriptor became ready.
    Timeout,
    /// The kernel reported an error condition on the descriptor, or
    /// registering it with the multiplexer failed.
    Error,
    /// The peer closed its end, or the descriptor hung up.
    Closed,
}

// === impl PollOp ===

impl PollOp {
    #[must_use]
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "read_write",
        }
    }
}

impl fmt::Display for PollOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// === impl PollStatus ===

impl PollStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_op_strings_are_total_and_injective() {
        let all = [PollOp::Read, PollOp::Write, PollOp::ReadWrite];
        for (i, a) in all.iter().enumerate() {
            assert!(!a.as_str().is_empty());
            for b in &all[i + 1..] {
                assert_ne!(a.as_str(), b.as_str());
            }
        }
    }

    #[test]
    fn poll_status_strings_are_total_and_injective() {
        let all = [
            PollStatus::Event,
            PollStatus::Timeout,
            PollStatus::Error,
            PollStatus::Closed,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(!a.as_str().is_empty());
            for b in &all[i + 1..] {
                assert_ne!(a.as_str(), b.as_str());
            }
        }
    }

    #[test]
    fn poll_op_direction_queries() {
        assert!(PollOp::Read.is_readable());
        assert!(!PollOp::Read.is_writable());
        assert!(PollOp::Write.is_writable());
        assert!(!PollOp::Write.is_readable());
        assert!(PollOp::ReadWrite.is_readable());
        assert!(PollOp::ReadWrite.is_writable());
    }
}
