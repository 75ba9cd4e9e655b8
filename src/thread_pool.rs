// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::ShuttingDown;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use parking_lot::{Condvar, Mutex};
use static_assertions::assert_impl_all;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

/// A fixed set of worker threads draining a FIFO queue of suspended
/// continuations.
///
/// Tasks enter the pool by awaiting [`schedule`](Self::schedule) (which
/// suspends the caller and hands its continuation to a worker) or through
/// [`resume`](Self::resume) (which hands an externally obtained continuation
/// to a worker). Workers resume continuations one at a time; a resumed task
/// runs on that worker until its next suspension point.
#[derive(Debug)]
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<Waker>>,
    available: Condvar,
    stop: AtomicBool,
    /// queued + in-flight continuations
    size: AtomicUsize,
}

/// Future returned by [`ThreadPool::schedule`] and
/// [`ThreadPool::yield_now`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
#[derive(Debug)]
pub struct Schedule<'a> {
    pool: &'a ThreadPool,
    enqueued: bool,
}

assert_impl_all!(ThreadPool: Send, Sync);

// === impl ThreadPool ===

impl ThreadPool {
    /// Creates a pool with `thread_count` workers; `0` means the process's
    /// available parallelism.
    #[must_use]
    pub fn new(thread_count: usize) -> Self {
        let thread_count = if thread_count == 0 {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            thread_count
        };

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stop: AtomicBool::new(false),
            size: AtomicUsize::new(0),
        });

        let workers = (0..thread_count)
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("evio-worker-{id}"))
                    .spawn(move || shared.run(id))
                    .expect("failed to spawn pool worker thread")
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Suspends the calling task and moves its continuation onto the pool;
    /// the task resumes on a worker thread.
    ///
    /// # Errors
    ///
    /// Completes with [`ShuttingDown`] once [`shutdown`](Self::shutdown) has
    /// been called.
    pub fn schedule(&self) -> Schedule<'_> {
        Schedule {
            pool: self,
            enqueued: false,
        }
    }

    /// Reschedules the calling task to the back of the queue so other queued
    /// work gets a turn. Identical to [`schedule`](Self::schedule).
    ///
    /// # Errors
    ///
    /// Completes with [`ShuttingDown`] once [`shutdown`](Self::shutdown) has
    /// been called.
    pub fn yield_now(&self) -> Schedule<'_> {
        self.schedule()
    }

    /// Hands an externally obtained continuation to the pool.
    ///
    /// Returns `false` (dropping the continuation) once the pool is shutting
    /// down.
    pub fn resume(&self, waker: Waker) -> bool {
        self.shared.size.fetch_add(1, Ordering::Release);
        if self.shared.stop.load(Ordering::Acquire) {
            self.shared.size.fetch_sub(1, Ordering::Release);
            return false;
        }
        self.shared.enqueue(waker);
        true
    }

    /// Signals workers to drain the queue and exit, then joins them.
    /// Idempotent; concurrent callers past the first return without
    /// waiting.
    pub fn shutdown(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("thread pool shutting down");
        self.shared.available.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }

    /// Approximate count of queued plus in-flight continuations.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// === impl Shared ===

impl Shared {
    fn enqueue(&self, waker: Waker) {
        let mut queue = self.queue.lock();
        queue.push_back(waker);
        self.available.notify_one();
    }

    fn run(&self, id: usize) {
        let _span = tracing::debug_span!("pool worker", worker = id).entered();
        tracing::trace!("worker started");

        while !self.stop.load(Ordering::Acquire) {
            let mut queue = self.queue.lock();
            while queue.is_empty() && !self.stop.load(Ordering::Acquire) {
                self.available.wait(&mut queue);
            }

            if let Some(waker) = queue.pop_front() {
                drop(queue);
                waker.wake();
                self.size.fetch_sub(1, Ordering::Release);
            }
        }

        // drain whatever was queued before the stop signal
        loop {
            let Some(waker) = self.queue.lock().pop_front() else {
                break;
            };
            waker.wake();
            self.size.fetch_sub(1, Ordering::Release);
        }

        tracing::trace!("worker exited");
    }
}

// === impl Schedule ===

impl Future for Schedule<'_> {
    type Output = Result<(), ShuttingDown>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.enqueued {
            return Poll::Ready(Ok(()));
        }

        let pool = self.pool;
        pool.shared.size.fetch_add(1, Ordering::Release);
        if pool.shared.stop.load(Ordering::Acquire) {
            pool.shared.size.fetch_sub(1, Ordering::Release);
            return Poll::Ready(Err(ShuttingDown(())));
        }

        self.enqueued = true;
        pool.shared.enqueue(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_wait::sync_wait;
    use crate::task::Task;
    use crate::when_all::when_all;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn continuation_moves_to_a_worker() {
        let _trace = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_thread_names(true)
            .set_default();

        let pool = Arc::new(ThreadPool::new(1));
        let caller = std::thread::current().id();

        let task = Task::new({
            let pool = Arc::clone(&pool);
            async move {
                pool.schedule().await.unwrap();
                assert_ne!(std::thread::current().id(), caller);
                42
            }
        });

        assert_eq!(sync_wait(task), 42);
    }

    #[test]
    fn yield_now_requeues() {
        let pool = Arc::new(ThreadPool::new(1));

        let result = sync_wait({
            let pool = Arc::clone(&pool);
            async move {
                pool.schedule().await.unwrap();
                pool.yield_now().await.unwrap();
                "done"
            }
        });
        assert_eq!(result, "done");
    }

    #[test]
    fn many_tasks_drain_on_one_worker() {
        let pool = Arc::new(ThreadPool::new(1));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let pool = Arc::clone(&pool);
                Task::new(async move {
                    pool.schedule().await.unwrap();
                    i
                })
            })
            .collect();

        let results = sync_wait(when_all(tasks));
        assert_eq!(results, (0..16).collect::<Vec<_>>());

        pool.shutdown();
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn schedule_after_shutdown_fails() {
        let pool = Arc::new(ThreadPool::new(1));
        pool.shutdown();

        let result = sync_wait({
            let pool = Arc::clone(&pool);
            async move { pool.schedule().await }
        });
        assert_eq!(result, Err(ShuttingDown(())));
    }

    #[test]
    fn resume_after_shutdown_returns_false() {
        let pool = ThreadPool::new(1);
        assert!(pool.resume(Waker::noop().clone()));
        pool.shutdown();
        assert!(!pool.resume(Waker::noop().clone()));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = ThreadPool::new(2);
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn zero_threads_falls_back_to_parallelism() {
        let pool = ThreadPool::new(0);
        assert!(pool.thread_count() >= 1);
    }
}
