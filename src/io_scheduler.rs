// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

pub(crate) mod poll_info;
pub(crate) mod timer;

use crate::poll::{PollOp, PollStatus};
use crate::sys::{Epoll, EventFd, Interest, TimerFd};
use crate::task::raw::TaskRef;
use crate::thread_pool::ThreadPool;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use futures::FutureExt;
use parking_lot::Mutex;
use poll_info::PollInfo;
use slab::Slab;
use static_assertions::assert_impl_all;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use timer::TimerQueue;

const TOKEN_SHUTDOWN: u64 = 0;
const TOKEN_TIMER: u64 = 1;
const TOKEN_WAKE: u64 = 2;
const TOKEN_USER_BASE: u64 = 3;

const MAX_EVENTS: usize = 128;
/// Upper bound on one multiplexer wait; keeps loop termination bounded even
/// when the final size decrement happens off the I/O thread.
const DEFAULT_WAIT_TIMEOUT_MS: i32 = 1000;

/// Where resumed continuations run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionStrategy {
    /// Continuations resume on the I/O thread itself, in readiness order.
    ThreadInline,
    /// Continuations are handed to a dedicated worker pool.
    ThreadPool,
}

/// Construction options for [`IoScheduler::make_shared`].
#[derive(Copy, Clone, Debug)]
pub struct Options {
    pub execution_strategy: ExecutionStrategy,
    /// Worker count under [`ExecutionStrategy::ThreadPool`]; `0` means the
    /// process's available parallelism.
    pub thread_count: usize,
}

/// An epoll-backed cooperative I/O scheduler.
///
/// The scheduler owns four descriptors (the multiplexer, a monotonic timer,
/// a wake-up counter and a shutdown counter) and a dedicated I/O thread
/// multiplexing readiness events, timer expirations and injected wake-ups
/// over them. Suspended tasks are resumed either inline on the I/O thread or
/// on a worker pool, per [`ExecutionStrategy`].
///
/// Dropping the last handle shuts the scheduler down, drains outstanding
/// work and joins the I/O thread.
#[derive(Debug)]
pub struct IoScheduler {
    shared: Arc<Shared>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    strategy: ExecutionStrategy,
    epoll: Epoll,
    timers: TimerQueue,
    wake_fd: EventFd,
    shutdown_fd: EventFd,
    pool: Option<ThreadPool>,
    shutdown: AtomicBool,
    /// Debounces writes to the wake descriptor: set by the first injector
    /// after a drain, cleared by the I/O thread while it holds the buffer
    /// lock.
    wake_pending: AtomicBool,
    /// Continuations injected by `schedule`/`resume` under the inline
    /// strategy, swapped out by the I/O thread on wake-up.
    injected: Mutex<Vec<Waker>>,
    /// Maps multiplexer tokens back to the wait records they belong to.
    registry: Mutex<Slab<Arc<PollInfo>>>,
    /// Scheduled + in-flight + waiting work owned by this scheduler.
    size: AtomicUsize,
}

/// Future returned by [`IoScheduler::schedule`] and
/// [`IoScheduler::yield_now`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
#[derive(Debug)]
pub struct Schedule<'a> {
    shared: &'a Shared,
    enqueued: bool,
}

/// A suspended readiness or timer wait.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
struct PollWait<'a> {
    shared: &'a Shared,
    info: Arc<PollInfo>,
    op: Option<PollOp>,
    deadline: Option<Instant>,
    armed: bool,
}

assert_impl_all!(IoScheduler: Send, Sync);

// === impl Options ===

impl Default for Options {
    fn default() -> Self {
        Self {
            execution_strategy: ExecutionStrategy::ThreadPool,
            thread_count: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

// === impl IoScheduler ===

impl IoScheduler {
    /// Creates a scheduler and starts its I/O thread.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the backing descriptors cannot be created
    /// or registered, or if the I/O thread cannot be spawned.
    pub fn make_shared(options: Options) -> io::Result<Arc<Self>> {
        let epoll = Epoll::new()?;
        let timer_fd = TimerFd::new()?;
        let wake_fd = EventFd::new()?;
        let shutdown_fd = EventFd::new()?;

        epoll.add(shutdown_fd.as_raw_fd(), Interest::READ, TOKEN_SHUTDOWN)?;
        epoll.add(timer_fd.as_raw_fd(), Interest::READ, TOKEN_TIMER)?;
        epoll.add(wake_fd.as_raw_fd(), Interest::READ, TOKEN_WAKE)?;

        let pool = match options.execution_strategy {
            ExecutionStrategy::ThreadPool => Some(ThreadPool::new(options.thread_count)),
            ExecutionStrategy::ThreadInline => None,
        };

        let shared = Arc::new(Shared {
            strategy: options.execution_strategy,
            epoll,
            timers: TimerQueue::new(timer_fd),
            wake_fd,
            shutdown_fd,
            pool,
            shutdown: AtomicBool::new(false),
            wake_pending: AtomicBool::new(false),
            injected: Mutex::new(Vec::new()),
            registry: Mutex::new(Slab::new()),
            size: AtomicUsize::new(0),
        });

        let io_thread = std::thread::Builder::new().name("evio-io".into()).spawn({
            let shared = Arc::clone(&shared);
            move || shared.run()
        })?;

        Ok(Arc::new(Self {
            shared,
            io_thread: Mutex::new(Some(io_thread)),
        }))
    }

    /// Suspends the calling task and requeues its continuation through the
    /// scheduler: onto the I/O thread's next iteration under
    /// [`ExecutionStrategy::ThreadInline`], or directly onto the pool
    /// otherwise.
    pub fn schedule(&self) -> Schedule<'_> {
        Schedule {
            shared: &self.shared,
            enqueued: false,
        }
    }

    /// Alias of [`schedule`](Self::schedule): gives other runnable work a
    /// turn.
    pub fn yield_now(&self) -> Schedule<'_> {
        self.schedule()
    }

    /// Suspends the calling task for at least `delay`. A zero delay reduces
    /// to [`schedule`](Self::schedule).
    pub async fn schedule_after(&self, delay: Duration) {
        if delay.is_zero() {
            self.schedule().await;
            return;
        }

        self.shared.size.fetch_add(1, Ordering::Release);
        let wait = PollWait {
            shared: &self.shared,
            info: PollInfo::for_timer(),
            op: None,
            deadline: Some(Instant::now() + delay),
            armed: false,
        };
        let _ = wait.await;
        self.shared.decrement_size();
    }

    /// Suspends the calling task until `deadline`. A deadline at or before
    /// now reduces to [`schedule`](Self::schedule).
    pub async fn schedule_at(&self, deadline: Instant) {
        if deadline <= Instant::now() {
            self.schedule().await;
            return;
        }

        self.shared.size.fetch_add(1, Ordering::Release);
        let wait = PollWait {
            shared: &self.shared,
            info: PollInfo::for_timer(),
            op: None,
            deadline: Some(deadline),
            armed: false,
        };
        let _ = wait.await;
        self.shared.decrement_size();
    }

    /// Alias of [`schedule_after`](Self::schedule_after).
    pub async fn yield_for(&self, delay: Duration) {
        self.schedule_after(delay).await;
    }

    /// Alias of [`schedule_at`](Self::schedule_at).
    pub async fn yield_until(&self, deadline: Instant) {
        self.schedule_at(deadline).await;
    }

    /// Waits for `fd` to become ready for `op`, with single-shot
    /// registration including peer-close reporting.
    ///
    /// A positive `timeout` bounds the wait and yields
    /// [`PollStatus::Timeout`] if it elapses first; a zero `timeout` waits
    /// indefinitely and never yields `Timeout`. A registration failure is
    /// reported as [`PollStatus::Error`].
    pub async fn poll(&self, fd: RawFd, op: PollOp, timeout: Duration) -> PollStatus {
        tracing::trace!(fd, op = %op, ?timeout, "poll");
        self.shared.size.fetch_add(1, Ordering::Release);

        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let wait = PollWait {
            shared: &self.shared,
            info: PollInfo::for_fd(fd),
            op: Some(op),
            deadline,
            armed: false,
        };
        let status = wait.await;

        self.shared.decrement_size();
        status
    }

    /// Starts a detached task owned by the scheduler. The task counts toward
    /// [`size`](Self::size) until it completes; a panic inside it is caught
    /// and logged.
    ///
    /// Returns `false` (dropping the task) once the scheduler is shutting
    /// down.
    pub fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.size.fetch_add(1, Ordering::Release);

        let task = TaskRef::new({
            let shared = Arc::clone(&self.shared);
            async move {
                if let Err(_payload) = AssertUnwindSafe(future).catch_unwind().await {
                    tracing::error!("spawned task panicked");
                }
                shared.decrement_size();
            }
        });

        let resumed = self.shared.resume_waker(task.waker());
        if !resumed {
            self.shared.decrement_size();
        }
        resumed
    }

    /// Hands an externally obtained continuation to the scheduler through
    /// the same path as [`schedule`](Self::schedule).
    ///
    /// Returns `false` (dropping the continuation) once the scheduler is
    /// shutting down.
    pub fn resume(&self, waker: Waker) -> bool {
        self.shared.resume_waker(waker)
    }

    /// Requests shutdown: no new work is accepted, outstanding work drains,
    /// then the I/O thread exits. Idempotent.
    pub fn shutdown(&self) {
        self.shared.request_shutdown();
    }

    /// Approximate count of scheduled + in-flight + waiting work.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.total_size()
    }
}

impl Drop for IoScheduler {
    fn drop(&mut self) {
        self.shared.request_shutdown();
        if let Some(handle) = self.io_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

// === impl Shared ===

impl Shared {
    /// Appends a continuation to the injected buffer and wakes the I/O
    /// thread, debouncing the wake-descriptor write.
    fn inject(&self, waker: Waker) {
        self.size.fetch_add(1, Ordering::Release);
        self.injected.lock().push(waker);

        if self
            .wake_pending
            .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            self.wake_fd.signal();
        }
    }

    fn resume_waker(&self, waker: Waker) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        match &self.pool {
            None => {
                self.inject(waker);
                true
            }
            Some(pool) => pool.resume(waker),
        }
    }

    fn decrement_size(&self) {
        if self.size.fetch_sub(1, Ordering::AcqRel) == 1 && self.shutdown.load(Ordering::Acquire)
        {
            // the loop may be blocked in epoll_wait; let it re-check
            self.wake_fd.signal();
        }
    }

    fn total_size(&self) -> usize {
        let own = self.size.load(Ordering::Acquire);
        match &self.pool {
            Some(pool) => own + pool.size(),
            None => own,
        }
    }

    fn request_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("scheduler shutdown requested");
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
        self.shutdown_fd.signal();
    }

    fn run(&self) {
        let _span = tracing::debug_span!("io loop").entered();
        tracing::debug!(strategy = ?self.strategy, "event loop started");

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        let mut ready: Vec<Waker> = Vec::new();
        let mut injected: Vec<Waker> = Vec::new();

        while !self.shutdown.load(Ordering::Acquire) || self.total_size() > 0 {
            let count = match self.epoll.wait(&mut events, DEFAULT_WAIT_TIMEOUT_MS) {
                Ok(count) => count,
                Err(error) => {
                    tracing::error!(%error, "epoll_wait failed");
                    break;
                }
            };

            for event in &events[..count] {
                // `epoll_event` is packed on this target; copy the fields out
                let (token, bits) = (event.u64, event.events);
                match token {
                    TOKEN_SHUTDOWN => self.shutdown_fd.drain(),
                    TOKEN_TIMER => self.on_timeout(&mut ready),
                    TOKEN_WAKE => self.on_wakeup(&mut injected),
                    _ => self.on_user_event(token, bits, &mut ready),
                }
            }

            self.drain_batches(&mut ready, &mut injected);
        }

        tracing::debug!("event loop terminated");
    }

    /// Resumes this iteration's batch: in-order on the I/O thread under the
    /// inline strategy, waker-by-waker onto the pool otherwise. Injected
    /// continuations additionally give back their size share once resumed.
    fn drain_batches(&self, ready: &mut Vec<Waker>, injected: &mut Vec<Waker>) {
        match &self.pool {
            None => {
                for waker in ready.drain(..) {
                    waker.wake();
                }
                let count = injected.len();
                for waker in injected.drain(..) {
                    waker.wake();
                }
                if count > 0 {
                    self.size.fetch_sub(count, Ordering::Release);
                }
            }
            Some(pool) => {
                debug_assert!(injected.is_empty());
                for waker in ready.drain(..) {
                    let fallback = waker.clone();
                    if !pool.resume(waker) {
                        // pool is gone; resume inline so shutdown can drain
                        fallback.wake();
                    }
                }
            }
        }
    }

    fn on_wakeup(&self, injected: &mut Vec<Waker>) {
        let mut queue = self.injected.lock();
        injected.append(&mut queue);
        self.wake_fd.drain();
        self.wake_pending.store(false, Ordering::Release);
    }

    fn on_timeout(&self, ready: &mut Vec<Waker>) {
        self.timers.timer_fd().drain();
        let expired = self.timers.pop_expired(Instant::now());
        tracing::trace!(expired = expired.len(), "timer fired");

        for info in expired {
            if info.claim(PollStatus::Timeout) {
                let _ = info.take_timer_key();
                if let Some(fd) = info.fd() {
                    if let Err(error) = self.epoll.remove(fd) {
                        tracing::trace!(fd, %error, "failed to deregister timed-out descriptor");
                    }
                }
                self.deregister(&info);
                if let Some(waker) = info.take_waker() {
                    ready.push(waker);
                }
            }
        }

        self.timers.reprogram();
    }

    fn on_user_event(&self, token: u64, bits: u32, ready: &mut Vec<Waker>) {
        let Some(slot) = token.checked_sub(TOKEN_USER_BASE) else {
            tracing::warn!(token, "readiness event with an unknown control token");
            return;
        };

        let info = {
            let registry = self.registry.lock();
            // absent means the timeout path already claimed and removed it
            let Some(info) = registry.get(slot as usize) else {
                return;
            };
            Arc::clone(info)
        };

        let events = Interest::from_bits_retain(bits);
        let status = status_from_events(events);
        tracing::trace!(fd = ?info.fd(), ?events, %status, "descriptor ready");

        if info.claim(status) {
            if let Some(fd) = info.fd() {
                if let Err(error) = self.epoll.remove(fd) {
                    tracing::trace!(fd, %error, "failed to deregister completed descriptor");
                }
            }
            if let Some(key) = info.take_timer_key() {
                self.timers.remove(key);
            }
            self.deregister(&info);
            if let Some(waker) = info.take_waker() {
                ready.push(waker);
            }
        }
    }

    fn deregister(&self, info: &Arc<PollInfo>) {
        if let Some(token) = info.take_token() {
            let _ = self.registry.lock().try_remove(token);
        }
    }
}

/// Translates kernel readiness bits into a [`PollStatus`]: data readiness
/// outranks the error bit, which outranks hang-up.
fn status_from_events(events: Interest) -> PollStatus {
    if events.intersects(Interest::READ | Interest::WRITE) {
        PollStatus::Event
    } else if events.contains(Interest::ERROR) {
        PollStatus::Error
    } else if events.intersects(Interest::READ_HUP | Interest::HUP) {
        PollStatus::Closed
    } else {
        tracing::warn!(?events, "readiness event with no recognizable bits");
        PollStatus::Error
    }
}

// === impl Schedule ===

impl Future for Schedule<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.enqueued {
            return Poll::Ready(());
        }
        self.enqueued = true;

        match &self.shared.pool {
            None => self.shared.inject(cx.waker().clone()),
            Some(pool) => {
                pool.resume(cx.waker().clone());
            }
        }
        Poll::Pending
    }
}

// === impl PollWait ===

impl Future for PollWait<'_> {
    type Output = PollStatus;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<PollStatus> {
        let this = self.get_mut();
        // register before arming: neither completion path can fire first
        this.info.register_waker(cx.waker());

        if !this.armed {
            this.armed = true;

            if let Some(deadline) = this.deadline {
                let key = this.shared.timers.insert(deadline, &this.info);
                this.info.set_timer_key(key);
            }

            if let Some(op) = this.op {
                let fd = this.info.fd().expect("a readiness wait must carry a descriptor");
                let token = this.shared.registry.lock().insert(Arc::clone(&this.info));
                this.info.set_token(token);

                let interest = Interest::from_op(op) | Interest::ONESHOT | Interest::READ_HUP;
                if let Err(error) =
                    this.shared
                        .epoll
                        .add(fd, interest, TOKEN_USER_BASE + token as u64)
                {
                    tracing::error!(fd, %error, "failed to register descriptor");
                    if this.info.claim(PollStatus::Error) {
                        if let Some(key) = this.info.take_timer_key() {
                            this.shared.timers.remove(key);
                        }
                        this.shared.deregister(&this.info);
                    }
                }
            }
        }

        match this.info.status() {
            Some(status) => Poll::Ready(status),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_wait::sync_wait;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::util::SubscriberInitExt;

    fn inline_scheduler() -> Arc<IoScheduler> {
        IoScheduler::make_shared(Options {
            execution_strategy: ExecutionStrategy::ThreadInline,
            thread_count: 0,
        })
        .unwrap()
    }

    /// A nonblocking pipe; both ends are plain fds the caller must close.
    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        // Safety: `fds` is a valid two-element buffer for pipe2 to fill.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        // Safety: the test owns `fd` and closes it exactly once.
        unsafe { libc::close(fd) };
    }

    fn write_byte(fd: RawFd) {
        let byte = [1u8];
        // Safety: writing one byte from a valid buffer.
        let rc = unsafe { libc::write(fd, byte.as_ptr().cast(), 1) };
        assert_eq!(rc, 1);
    }

    fn wait_for_drain(scheduler: &IoScheduler) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.size() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(scheduler.size(), 0);
    }

    #[test]
    fn schedule_resumes_on_io_thread() {
        let scheduler = inline_scheduler();

        let name = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler.schedule().await;
                thread::current().name().map(String::from)
            }
        });
        assert_eq!(name.as_deref(), Some("evio-io"));
        wait_for_drain(&scheduler);
    }

    #[test]
    fn pool_strategy_resumes_on_worker() {
        let scheduler = IoScheduler::make_shared(Options {
            execution_strategy: ExecutionStrategy::ThreadPool,
            thread_count: 2,
        })
        .unwrap();
        let caller = thread::current().id();

        let name = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler.schedule().await;
                assert_ne!(thread::current().id(), caller);
                thread::current().name().map(String::from)
            }
        });
        assert!(name.unwrap().starts_with("evio-worker"));
    }

    #[test]
    fn schedule_after_zero_reduces_to_schedule() {
        let scheduler = inline_scheduler();

        let name = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler.schedule_after(Duration::ZERO).await;
                thread::current().name().map(String::from)
            }
        });
        assert_eq!(name.as_deref(), Some("evio-io"));
    }

    #[test]
    fn yield_for_sleeps_at_least_the_delay() {
        let scheduler = inline_scheduler();

        let start = Instant::now();
        sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler.yield_for(Duration::from_millis(50)).await;
            }
        });
        assert!(start.elapsed() >= Duration::from_millis(50));
        wait_for_drain(&scheduler);
    }

    #[test]
    fn yield_until_past_deadline_completes() {
        let scheduler = inline_scheduler();
        sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler.yield_until(Instant::now() - Duration::from_millis(1)).await;
            }
        });
    }

    #[test]
    fn poll_reports_readable_data() {
        let scheduler = inline_scheduler();
        let (read_fd, write_fd) = pipe();
        write_byte(write_fd);

        let status = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler
                    .poll(read_fd, PollOp::Read, Duration::from_secs(1))
                    .await
            }
        });
        assert_eq!(status, PollStatus::Event);

        close(read_fd);
        close(write_fd);
        wait_for_drain(&scheduler);
    }

    #[test]
    fn poll_never_times_out_with_zero_timeout() {
        let scheduler = inline_scheduler();
        let (read_fd, write_fd) = pipe();
        write_byte(write_fd);

        let status = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.poll(read_fd, PollOp::Read, Duration::ZERO).await }
        });
        assert_eq!(status, PollStatus::Event);

        close(read_fd);
        close(write_fd);
    }

    #[test]
    fn poll_times_out_without_data() {
        let scheduler = inline_scheduler();
        let (read_fd, write_fd) = pipe();

        let start = Instant::now();
        let status = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler
                    .poll(read_fd, PollOp::Read, Duration::from_millis(50))
                    .await
            }
        });
        assert_eq!(status, PollStatus::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(50));

        close(read_fd);
        close(write_fd);
        wait_for_drain(&scheduler);
    }

    #[test]
    fn poll_reports_peer_close() {
        let scheduler = inline_scheduler();
        let (read_fd, write_fd) = pipe();
        close(write_fd);

        let status = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler
                    .poll(read_fd, PollOp::Read, Duration::from_secs(1))
                    .await
            }
        });
        assert_eq!(status, PollStatus::Closed);

        close(read_fd);
    }

    #[test]
    fn poll_invalid_descriptor_reports_error() {
        let scheduler = inline_scheduler();

        let status = sync_wait({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.poll(-1, PollOp::Read, Duration::from_secs(1)).await }
        });
        assert_eq!(status, PollStatus::Error);
        wait_for_drain(&scheduler);
    }

    #[test]
    fn spawned_tasks_run_and_drain() {
        let _trace = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_thread_names(true)
            .set_default();

        let scheduler = inline_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let accepted = scheduler.spawn({
                let scheduler = Arc::clone(&scheduler);
                let counter = Arc::clone(&counter);
                async move {
                    scheduler.yield_for(Duration::from_millis(1)).await;
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
            assert!(accepted);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::Relaxed) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        wait_for_drain(&scheduler);
    }

    #[test]
    fn spawn_after_shutdown_is_rejected() {
        let scheduler = inline_scheduler();
        scheduler.shutdown();
        assert!(!scheduler.spawn(async {}));
        assert_eq!(scheduler.size(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_and_bounded() {
        let scheduler = inline_scheduler();
        scheduler.shutdown();
        scheduler.shutdown();
        // dropping joins the I/O thread; completing the test is the bound
    }

    #[test]
    fn status_translation_precedence() {
        assert_eq!(status_from_events(Interest::READ), PollStatus::Event);
        assert_eq!(status_from_events(Interest::WRITE), PollStatus::Event);
        assert_eq!(
            status_from_events(Interest::READ | Interest::READ_HUP),
            PollStatus::Event
        );
        assert_eq!(status_from_events(Interest::ERROR), PollStatus::Error);
        assert_eq!(status_from_events(Interest::HUP), PollStatus::Closed);
        assert_eq!(status_from_events(Interest::READ_HUP), PollStatus::Closed);
    }
}
