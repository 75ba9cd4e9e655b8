// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::Wake;

/// Suspended, nothing scheduled.
const IDLE: u8 = 0;
/// Some thread is currently driving the task.
const POLLING: u8 = 1;
/// A wake arrived while the task was being driven; the driving thread must
/// poll again before releasing it.
const NOTIFIED: u8 = 2;
/// The computation finished (or its final poll panicked).
const COMPLETE: u8 = 3;

/// A reference-counted, type-erased handle to a root task.
///
/// Resuming a `TaskRef` polls the underlying computation *on the calling
/// thread*, which is what gives the pool and scheduler strategies their
/// observable placement: whichever thread wakes a suspended root task is the
/// thread its continuation runs on. The handle doubles as the task's
/// [`Waker`] target, so a clone of the waker held by a reactor or queue keeps
/// the task alive until it is either resumed or forgotten.
pub(crate) struct TaskRef(Arc<RawTask>);

struct RawTask {
    state: AtomicU8,
    // Dropped (set to `None`) once the task completes so captured resources
    // are released eagerly rather than when the last waker clone dies.
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
}

// === impl TaskRef ===

impl TaskRef {
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(RawTask {
            state: AtomicU8::new(IDLE),
            future: Mutex::new(Some(Box::pin(future))),
        }))
    }

    /// Drives the task until its next suspension point (or completion) on
    /// the calling thread. A no-op if the task already completed or another
    /// thread is driving it (the concurrent driver re-polls on our behalf).
    pub(crate) fn resume(&self) {
        RawTask::resume(&self.0);
    }

    /// A waker that resumes this task inline on whichever thread wakes it.
    pub(crate) fn waker(&self) -> Waker {
        Waker::from(Arc::clone(&self.0))
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.0.state.load(Ordering::Acquire) == COMPLETE
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("addr", &Arc::as_ptr(&self.0))
            .field("state", &self.0.state.load(Ordering::Relaxed))
            .finish()
    }
}

// === impl RawTask ===

impl RawTask {
    fn resume(this: &Arc<Self>) {
        // Claim the task. Exactly one thread may hold the POLLING state; a
        // wake that loses the race records NOTIFIED so the winner loops.
        let mut current = this.state.load(Ordering::Acquire);
        loop {
            match current {
                IDLE => {
                    match this.state.compare_exchange(
                        IDLE,
                        POLLING,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => current = actual,
                    }
                }
                POLLING => {
                    match this.state.compare_exchange(
                        POLLING,
                        NOTIFIED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(actual) => current = actual,
                    }
                }
                NOTIFIED | COMPLETE => return,
                _ => unreachable!("invalid task state"),
            }
        }

        let waker = Waker::from(Arc::clone(this));
        let mut cx = Context::from_waker(&waker);

        loop {
            let poll = {
                let mut slot = this.future.lock();
                let Some(future) = slot.as_mut() else {
                    this.state.store(COMPLETE, Ordering::Release);
                    return;
                };

                match std::panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
                {
                    Ok(poll) => {
                        if poll.is_ready() {
                            *slot = None;
                        }
                        poll
                    }
                    Err(_payload) => {
                        tracing::error!(task.addr = ?Arc::as_ptr(this), "root task poll panicked");
                        *slot = None;
                        Poll::Ready(())
                    }
                }
            };

            match poll {
                Poll::Ready(()) => {
                    this.state.store(COMPLETE, Ordering::Release);
                    return;
                }
                Poll::Pending => {
                    match this.state.compare_exchange(
                        POLLING,
                        IDLE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(NOTIFIED) => {
                            // woken mid-poll, run another round
                            this.state.store(POLLING, Ordering::Release);
                        }
                        Err(state) => unreachable!("invalid task state {state}"),
                    }
                }
            }
        }
    }
}

impl Wake for RawTask {
    fn wake(self: Arc<Self>) {
        RawTask::resume(&self);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        RawTask::resume(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn resume_runs_to_completion() {
        let hits = Arc::new(AtomicUsize::new(0));
        let task = TaskRef::new({
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::Relaxed);
            }
        });

        assert!(!task.is_complete());
        task.resume();
        assert!(task.is_complete());
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        // completed tasks ignore further resumes
        task.resume();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn waker_resumes_suspended_task() {
        struct YieldOnce {
            yielded: bool,
            stash: Arc<Mutex<Option<Waker>>>,
        }
        impl Future for YieldOnce {
            type Output = ();

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if self.yielded {
                    Poll::Ready(())
                } else {
                    self.yielded = true;
                    *self.stash.lock() = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        }

        let stash = Arc::new(Mutex::new(None));
        let task = TaskRef::new(YieldOnce {
            yielded: false,
            stash: Arc::clone(&stash),
        });

        task.resume();
        assert!(!task.is_complete());

        let waker = stash.lock().take().unwrap();
        waker.wake();
        assert!(task.is_complete());
    }

    #[test]
    fn panic_in_task_completes_it() {
        let task = TaskRef::new(async {
            panic!("boom");
        });
        task.resume();
        assert!(task.is_complete());
    }

    #[test]
    fn wake_from_another_thread_runs_there() {
        struct Suspend {
            stash: Arc<Mutex<Option<Waker>>>,
            armed: bool,
        }
        impl Future for Suspend {
            type Output = ();

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if self.armed {
                    Poll::Ready(())
                } else {
                    self.armed = true;
                    *self.stash.lock() = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        }

        let stash = Arc::new(Mutex::new(None));
        let resumed_on = Arc::new(Mutex::new(None));
        let task = TaskRef::new({
            let stash = Arc::clone(&stash);
            let resumed_on = Arc::clone(&resumed_on);
            async move {
                Suspend {
                    stash,
                    armed: false,
                }
                .await;
                *resumed_on.lock() = Some(std::thread::current().id());
            }
        });

        let main_id = std::thread::current().id();
        task.resume();
        let waker = stash.lock().take().unwrap();

        std::thread::spawn(move || waker.wake()).join().unwrap();

        assert!(task.is_complete());
        let resumed_on = resumed_on.lock().take().unwrap();
        assert_ne!(resumed_on, main_id);
    }
}
