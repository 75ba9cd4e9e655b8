// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use parking_lot::{Condvar, Mutex};
use static_assertions::assert_impl_all;

/// A one-shot completion event: one thread parks on [`wait`](Self::wait),
/// any other thread releases it with [`set`](Self::set).
///
/// The flag is sticky, so a `set` that happens before the waiter arrives is
/// not lost, and every `wait` after the first `set` returns immediately. All
/// stores sequenced before `set` are visible to the waiter when `wait`
/// returns.
#[derive(Debug, Default)]
pub(crate) struct Parker {
    set: Mutex<bool>,
    condvar: Condvar,
}

assert_impl_all!(Parker: Send, Sync);

// === impl Parker ===

impl Parker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.condvar.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.condvar.wait(&mut set);
        }
    }
}
