//! Single-shot awaitable/promise pair (spec component C4).
//!
//! `AsyncOperation<T>` is the cell; [`OperationHandle`] is the `Future` a
//! reader actually awaits. Splitting the two lets the channel hold `Arc`s to
//! the cell (in its blocked-reader deque, C5) while the caller's stack frame
//! holds the `Future`, matching the spec's "owned node on a doubly linked
//! intrusive list under the channel lock" design note (§9) without needing
//! unsafe intrusive pointers: an `Arc` is the node, the deque is the list.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use pq_core::{PriorityError, Result};

enum Slot<T> {
    /// Pooled and free for reuse.
    Available,
    /// Parked, no continuation registered yet.
    Pending,
    /// Parked, a waker is registered and will be woken on completion.
    PendingWithWaker(Waker),
    /// Already resolved; the contained future poll will observe this once
    /// and then, if pooled, the cell resets to `Available`.
    Completed(Result<T>),
}

/// The cell behind a parked read/write. See module docs.
pub struct AsyncOperation<T> {
    slot: Mutex<Slot<T>>,
    /// Gates the single terminal transition when the operation is
    /// cancellable, so a racing `try_set_canceled` and `try_set_result`
    /// cannot both "win".
    completion_reserved: AtomicBool,
    cancellable: bool,
    run_continuations_asynchronously: bool,
    generation: AtomicU64,
}

impl<T: Send + 'static> AsyncOperation<T> {
    pub fn new(cancellable: bool, run_continuations_asynchronously: bool) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Pending),
            completion_reserved: AtomicBool::new(false),
            cancellable,
            run_continuations_asynchronously,
            generation: AtomicU64::new(0),
        })
    }

    fn new_pooled() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Available),
            completion_reserved: AtomicBool::new(false),
            cancellable: false,
            run_continuations_asynchronously: false,
            generation: AtomicU64::new(0),
        })
    }

    /// Monotonic per-instance generation, bumped each time a pooled instance
    /// is re-armed; lets callers detect a stale handle to a reused cell.
    pub fn token_id(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Transitions `Available -> Pending`. Only ever called on the channel's
    /// single pooled, non-cancellable reader.
    pub fn try_own_and_reset(self: &Arc<Self>) -> bool {
        debug_assert!(!self.cancellable, "pooled operations must not be cancellable");
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Available => {
                *slot = Slot::Pending;
                self.completion_reserved.store(false, Ordering::Release);
                self.generation.fetch_add(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    /// Returns the `result` back to the caller on failure (already completed,
    /// or — for a cancellable op — raced and lost to a concurrent
    /// cancellation) so a writer can recover the item and retry against the
    /// next blocked reader instead of losing it.
    fn complete(self: &Arc<Self>, result: Result<T>) -> std::result::Result<(), Result<T>> {
        if self.cancellable
            && self
                .completion_reserved
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Err(result);
        }
        let waker = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Available | Slot::Completed(_) => return Err(result),
                Slot::Pending => {
                    *slot = Slot::Completed(result);
                    None
                }
                Slot::PendingWithWaker(_) => {
                    let Slot::PendingWithWaker(w) =
                        std::mem::replace(&mut *slot, Slot::Completed(result))
                    else {
                        unreachable!()
                    };
                    Some(w)
                }
            }
        };
        if let Some(waker) = waker {
            if self.run_continuations_asynchronously {
                let this = self.clone();
                tokio::spawn(async move {
                    let _ = &this;
                    waker.wake();
                });
            } else {
                waker.wake();
            }
        }
        Ok(())
    }

    /// On failure, hands `value` back — the completion never happened, so
    /// the caller (typically a writer retrying against the next blocked
    /// reader) still owns it.
    pub fn try_set_result(self: &Arc<Self>, value: T) -> std::result::Result<(), T> {
        match self.complete(Ok(value)) {
            Ok(()) => Ok(()),
            Err(Ok(v)) => Err(v),
            Err(Err(_)) => unreachable!("complete() was called with Ok(value)"),
        }
    }

    pub fn try_set_exception(self: &Arc<Self>, err: PriorityError) -> bool {
        self.complete(Err(err)).is_ok()
    }

    pub fn try_set_canceled(self: &Arc<Self>) -> bool {
        self.complete(Err(PriorityError::Cancelled)).is_ok()
    }

    pub fn is_completed(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Completed(_))
    }

    fn poll_take(self: &Arc<Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Completed(_) => {
                let Slot::Completed(result) = std::mem::replace(&mut *slot, Slot::Pending) else {
                    unreachable!()
                };
                if !self.cancellable {
                    *slot = Slot::Available;
                }
                Poll::Ready(result)
            }
            Slot::Pending => {
                *slot = Slot::PendingWithWaker(cx.waker().clone());
                Poll::Pending
            }
            Slot::PendingWithWaker(w) => {
                if !w.will_wake(cx.waker()) {
                    *w = cx.waker().clone();
                }
                Poll::Pending
            }
            Slot::Available => {
                // Polled before anyone armed it; treat as still pending.
                *slot = Slot::PendingWithWaker(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// A single-shot `Future` over an [`AsyncOperation`] cell.
pub struct OperationHandle<T> {
    op: Arc<AsyncOperation<T>>,
}

impl<T> Clone for OperationHandle<T> {
    fn clone(&self) -> Self {
        Self { op: self.op.clone() }
    }
}

impl<T> OperationHandle<T> {
    pub fn new(op: Arc<AsyncOperation<T>>) -> Self {
        Self { op }
    }

    pub fn cell(&self) -> &Arc<AsyncOperation<T>> {
        &self.op
    }
}

impl<T: Send + 'static> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.op.poll_take(cx)
    }
}

/// A single reusable, non-cancellable operation cell, for the common
/// "ReadAsync with no cancellation" fast path (spec §4.5 read path (b)).
pub struct Pooled<T> {
    cell: parking_lot::Mutex<Option<Arc<AsyncOperation<T>>>>,
}

impl<T: Send + 'static> Pooled<T> {
    pub fn new() -> Self {
        Self {
            cell: parking_lot::Mutex::new(None),
        }
    }

    /// Returns the existing pooled cell if it is free, re-arming it; creates
    /// one on first use.
    pub fn acquire(&self) -> Arc<AsyncOperation<T>> {
        let mut guard = self.cell.lock();
        if let Some(op) = guard.as_ref() {
            if op.try_own_and_reset() {
                return op.clone();
            }
        }
        let fresh = AsyncOperation::new_pooled();
        *guard = Some(fresh.clone());
        fresh.try_own_and_reset();
        fresh
    }
}

impl<T: Send + 'static> Default for Pooled<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_with_result() {
        let op = AsyncOperation::<i32>::new(true, false);
        let handle = OperationHandle::new(op.clone());
        assert!(op.try_set_result(42).is_ok());
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn parked_then_completed_wakes_waiter() {
        let op = AsyncOperation::<i32>::new(true, false);
        let handle = OperationHandle::new(op.clone());
        let waiter = tokio::spawn(handle);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(op.try_set_result(7).is_ok());
        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn cancel_wins_exactly_once() {
        let op = AsyncOperation::<i32>::new(true, false);
        assert!(op.try_set_canceled());
        assert_eq!(
            op.try_set_result(1),
            Err(1),
            "completion must be reserved exactly once, and the value handed back"
        );
        let handle = OperationHandle::new(op);
        assert!(matches!(handle.await, Err(PriorityError::Cancelled)));
    }

    #[test]
    fn pooled_cell_is_reused() {
        let pool = Pooled::<i32>::new();
        let a = pool.acquire();
        let token_a = a.token_id();
        a.try_set_result(1).unwrap();
        // Consume synchronously via a no-op waker so the cell resets to Available.
        let waker = futures_task_test_waker();
        let mut cx = Context::from_waker(&waker);
        let mut handle = OperationHandle::new(a.clone());
        let _ = Pin::new(&mut handle).poll(&mut cx);
        let b = pool.acquire();
        assert_eq!(Arc::as_ptr(&a), Arc::as_ptr(&b));
        assert!(b.token_id() > token_a);
    }

    fn futures_task_test_waker() -> Waker {
        use std::task::{RawWaker, RawWakerVTable};
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }
}
