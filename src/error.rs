// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use std::any::Any;

/// Error produced when reading a [`Task`](crate::task::Task)'s result.
pub enum TaskError {
    /// The task has not produced a value or error yet.
    NotReady,

    /// The task's computation panicked; the payload is retained so callers
    /// can rethrow it with `std::panic::resume_unwind`.
    Panicked(Box<dyn Any + Send + 'static>),
}

/// The target (pool or scheduler) has been shut down and accepts no new work.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ShuttingDown(pub(crate) ());

// === impl TaskError ===

impl TaskError {
    pub(crate) fn panicked(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self::Panicked(payload)
    }

    /// Returns `true` if the task has not completed yet.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady)
    }

    /// Returns `true` if the task's computation panicked.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// The panic message, if the task panicked with a string payload.
    #[must_use]
    pub fn panic_message(&self) -> Option<&str> {
        let Self::Panicked(payload) = self else {
            return None;
        };
        if let Some(msg) = payload.downcast_ref::<&'static str>() {
            Some(msg)
        } else {
            payload.downcast_ref::<String>().map(String::as_str)
        }
    }

    /// Consumes the error, returning the captured panic payload if there is
    /// one.
    pub fn into_panic(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            Self::NotReady => None,
            Self::Panicked(payload) => Some(payload),
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => f.write_str("NotReady"),
            Self::Panicked(_) => f
                .debug_tuple("Panicked")
                .field(&self.panic_message().unwrap_or("..."))
                .finish(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => f.write_str("task has not produced a result yet"),
            Self::Panicked(_) => match self.panic_message() {
                Some(msg) => write!(f, "task panicked: {msg}"),
                None => f.write_str("task panicked"),
            },
        }
    }
}

impl core::error::Error for TaskError {}

// === impl ShuttingDown ===

impl fmt::Debug for ShuttingDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShuttingDown")
    }
}

impl fmt::Display for ShuttingDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("shutting down")
    }
}

impl core::error::Error for ShuttingDown {}
