// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::task::raw::TaskRef;
use futures::FutureExt;
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

/// Awaits a collection of awaitables concurrently, yielding their results
/// positionally once the last one completes.
///
/// Accepts a tuple of heterogeneous awaitables (up to eight; unit-producing
/// inputs contribute a `()` slot) or a `Vec` of homogeneous ones. All inputs
/// are moved into the returned future and started at its first poll; each
/// runs as an independently resumable task, so inputs that suspend on a pool
/// or scheduler proceed concurrently with their siblings.
///
/// If an input panicked, the panic is resumed on the awaiter when its slot
/// is read; slots are read in input order, so the first errored slot wins.
///
/// An empty input (`()` or an empty `Vec`) completes synchronously.
pub fn when_all<I>(input: I) -> WhenAll<I::Output>
where
    I: IntoWhenAll,
{
    input.into_when_all()
}

/// Conversion into the concurrently-awaited form used by [`when_all`].
pub trait IntoWhenAll {
    type Output;

    fn into_when_all(self) -> WhenAll<Self::Output>;
}

/// Future returned by [`when_all`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct WhenAll<O> {
    latch: Arc<Latch>,
    children: Vec<TaskRef>,
    gather: Option<Box<dyn FnOnce() -> O + Send>>,
    started: bool,
}

/// Countdown coordinating n children with one awaiter.
///
/// Initialized to n+1: every child decrements once at completion and the
/// awaiter decrements once after registering its waker. Whoever performs the
/// final decrement wakes the awaiter, which closes the race between "all
/// children finished before the awaiter suspended" and "the awaiter
/// subscribed after some finished".
struct Latch {
    remaining: AtomicUsize,
    waker: AtomicWaker,
}

type Slot<T> = Arc<Mutex<Option<Result<T, Box<dyn Any + Send>>>>>;

// === impl Latch ===

impl Latch {
    fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            waker: AtomicWaker::new(),
        }
    }

    fn arrive(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.waker.wake();
        }
    }
}

// === impl WhenAll ===

fn child<F>(future: F, latch: &Arc<Latch>) -> (TaskRef, Slot<F::Output>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let slot: Slot<F::Output> = Arc::new(Mutex::new(None));
    let task = TaskRef::new({
        let slot = Arc::clone(&slot);
        let latch = Arc::clone(latch);
        async move {
            let outcome = AssertUnwindSafe(future).catch_unwind().await;
            *slot.lock() = Some(outcome);
            latch.arrive();
        }
    });
    (task, slot)
}

fn take_slot<T>(slot: &Slot<T>) -> T {
    match slot.lock().take() {
        Some(Ok(value)) => value,
        Some(Err(payload)) => std::panic::resume_unwind(payload),
        None => unreachable!("when_all child arrived at the latch without storing a result"),
    }
}

impl<O> Future for WhenAll<O> {
    type Output = O;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<O> {
        let this = self.get_mut();
        this.latch.waker.register(cx.waker());

        if !this.started {
            this.started = true;
            tracing::trace!(children = this.children.len(), "when_all: starting children");
            for task in &this.children {
                task.resume();
            }
            // the awaiter's own share
            this.latch.arrive();
        }

        if this.latch.remaining.load(Ordering::Acquire) == 0 {
            let gather = this
                .gather
                .take()
                .expect("when_all polled after completion");
            Poll::Ready(gather())
        } else {
            Poll::Pending
        }
    }
}

// === IntoWhenAll impls ===

impl IntoWhenAll for () {
    type Output = ();

    fn into_when_all(self) -> WhenAll<()> {
        WhenAll {
            latch: Arc::new(Latch::new(1)),
            children: Vec::new(),
            gather: Some(Box::new(|| ())),
            started: false,
        }
    }
}

impl<F> IntoWhenAll for Vec<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    type Output = Vec<F::Output>;

    fn into_when_all(self) -> WhenAll<Vec<F::Output>> {
        let latch = Arc::new(Latch::new(self.len() + 1));
        let mut children = Vec::with_capacity(self.len());
        let mut slots = Vec::with_capacity(self.len());
        for future in self {
            let (task, slot) = child(future, &latch);
            children.push(task);
            slots.push(slot);
        }
        WhenAll {
            latch,
            children,
            gather: Some(Box::new(move || {
                slots.iter().map(|slot| take_slot(slot)).collect()
            })),
            started: false,
        }
    }
}

macro_rules! impl_when_all_for_tuple {
    ($(($Fut:ident, $task:ident)),+) => {
        impl<$($Fut),+> IntoWhenAll for ($($Fut,)+)
        where
            $(
                $Fut: Future + Send + 'static,
                $Fut::Output: Send + 'static,
            )+
        {
            type Output = ($($Fut::Output,)+);

            fn into_when_all(self) -> WhenAll<Self::Output> {
                let count = [$(stringify!($Fut)),+].len();
                let latch = Arc::new(Latch::new(count + 1));

                let ($($task,)+) = self;
                $(let $task = child($task, &latch);)+

                let children = vec![$($task.0),+];
                let gather = Box::new(move || ($(take_slot(&$task.1),)+));

                WhenAll {
                    latch,
                    children,
                    gather: Some(gather),
                    started: false,
                }
            }
        }
    };
}

impl_when_all_for_tuple!((A, a));
impl_when_all_for_tuple!((A, a), (B, b));
impl_when_all_for_tuple!((A, a), (B, b), (C, c));
impl_when_all_for_tuple!((A, a), (B, b), (C, c), (D, d));
impl_when_all_for_tuple!((A, a), (B, b), (C, c), (D, d), (E, e));
impl_when_all_for_tuple!((A, a), (B, b), (C, c), (D, d), (E, e), (F, f));
impl_when_all_for_tuple!((A, a), (B, b), (C, c), (D, d), (E, e), (F, f), (G, g));
impl_when_all_for_tuple!((A, a), (B, b), (C, c), (D, d), (E, e), (F, f), (G, g), (H, h));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_wait::sync_wait;
    use crate::task::Task;
    use crate::thread_pool::ThreadPool;

    #[test]
    fn heterogeneous_tuple() {
        let one = Task::new(async { 1 });
        let string = Task::new(async { String::from("this is string") });
        let unit = Task::new(async {});

        let (x, y, z) = sync_wait(when_all((one, string, unit)));
        assert_eq!(x, 1);
        assert_eq!(y, "this is string");
        let () = z;
    }

    #[test]
    fn homogeneous_vec_preserves_order() {
        let tasks: Vec<_> = (0..8).map(|i| Task::new(async move { i * 10 })).collect();

        let results = sync_wait(when_all(tasks));
        assert_eq!(results, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn empty_inputs_complete_synchronously() {
        sync_wait(when_all(()));
        let results: Vec<i32> = sync_wait(when_all(Vec::<Task<i32>>::new()));
        assert!(results.is_empty());
    }

    #[test]
    fn awaitable_inside_task() {
        let result = sync_wait(Task::new(async {
            let (x, y) = when_all((Task::new(async { 3 }), Task::new(async { 4 }))).await;
            x + y
        }));
        assert_eq!(result, 7);
    }

    #[test]
    #[should_panic(expected = "child went wrong")]
    fn errored_slot_rethrows_on_read() {
        async fn faulty() -> i32 {
            panic!("child went wrong")
        }

        let _ = sync_wait(when_all((Task::new(async { 1 }), Task::new(faulty()))));
    }

    #[test]
    fn children_run_concurrently_on_a_pool() {
        let pool = Arc::new(ThreadPool::new(2));
        let make = |pool: Arc<ThreadPool>, reply: i32| {
            Task::new(async move {
                pool.schedule().await.unwrap();
                reply
            })
        };

        let (a, b, c) = sync_wait(when_all((
            make(Arc::clone(&pool), 1),
            make(Arc::clone(&pool), 2),
            make(Arc::clone(&pool), 3),
        )));
        assert_eq!((a, b, c), (1, 2, 3));
        pool.shutdown();
    }
}
