// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::park::Parker;
use crate::task::raw::TaskRef;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Runs an awaitable to completion, blocking the calling thread.
///
/// The awaitable is started on the calling thread; when it suspends, the
/// caller parks on a condition variable until the awaitable's final
/// continuation fires. Note that the continuation runs wherever the wakeup
/// comes from (a pool worker, the I/O thread), so the body after a
/// suspension point is not guaranteed to run on the caller's thread; only
/// the return happens there.
///
/// The result is returned by move. If the awaitable panicked, the panic is
/// resumed on the caller.
pub fn sync_wait<F>(awaitable: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let event = Arc::new(Parker::new());
    let slot: Arc<Mutex<Option<Result<F::Output, Box<dyn Any + Send>>>>> =
        Arc::new(Mutex::new(None));

    let task = TaskRef::new({
        let event = Arc::clone(&event);
        let slot = Arc::clone(&slot);
        async move {
            let outcome = AssertUnwindSafe(awaitable).catch_unwind().await;
            *slot.lock() = Some(outcome);
            event.set();
        }
    });

    tracing::trace!(task = ?task, "sync_wait: starting");
    task.resume();
    event.wait();

    let outcome = slot
        .lock()
        .take()
        .expect("sync_wait event was set without a stored result");
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
