//! The rendezvous engine shared by the fixed- and dynamic-priority channels
//! (spec §4.5/§4.6): a lock-free [`Store`] for the happy path, and a single
//! `parking_lot::Mutex` — the "channel lock" of spec §5 — guarding exactly
//! the three things that must move together: `done_writing`, the
//! blocked-reader deque (C5), and the waiting-reader list.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use pq_async::{AsyncOperation, CancelToken, OperationHandle, Pooled, WaiterQueue};
use pq_core::{PriorityError, PriorityItem, Result};

use crate::store::Store;

struct LockState<T, P> {
    /// `None` while open; `Some(err)` once `try_complete` has run, per the
    /// "once set, never cleared" invariant (spec §3).
    done_writing: Option<Option<PriorityError>>,
    blocked_readers: WaiterQueue<PriorityItem<T, P>>,
    read_waiters: Vec<Arc<AsyncOperation<bool>>>,
}

struct CompletionState {
    notify: Notify,
    done: AtomicBool,
    result: Mutex<Option<std::result::Result<(), PriorityError>>>,
}

/// The part of a channel that is independent of which [`Store`] backs it.
pub struct ChannelCore<T, P, S> {
    store: S,
    lock: Mutex<LockState<T, P>>,
    count: AtomicUsize,
    completion: CompletionState,
    pooled_reader: Pooled<PriorityItem<T, P>>,
}

impl<T, P, S> ChannelCore<T, P, S>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    S: Store<T, P>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock: Mutex::new(LockState {
                done_writing: None,
                blocked_readers: WaiterQueue::new(),
                read_waiters: Vec::new(),
            }),
            count: AtomicUsize::new(0),
            completion: CompletionState {
                notify: Notify::new(),
                done: AtomicBool::new(false),
                result: Mutex::new(None),
            },
            pooled_reader: Pooled::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.lock.lock().done_writing.is_some()
    }

    // ---- write path (spec §4.5 "Write path") ----------------------------

    pub fn try_write(&self, priority: P, item: T) -> bool {
        let mut priority = priority;
        let mut item = item;
        loop {
            let reader = {
                let mut state = self.lock.lock();
                if state.done_writing.is_some() {
                    return false;
                }
                match state.blocked_readers.pop_front() {
                    Some(reader) => reader,
                    None => {
                        self.store.enqueue(priority, item);
                        self.count.fetch_add(1, Ordering::AcqRel);
                        let waiters = std::mem::take(&mut state.read_waiters);
                        drop(state);
                        for w in waiters {
                            let _ = w.try_set_result(true);
                        }
                        return true;
                    }
                }
            };
            // Outside the lock: deliver directly to the parked reader. Count
            // is incremented here and decremented immediately on success, so
            // the only externally observable window is "stored" or
            // "delivered and completed" — never both or neither (spec §3).
            self.count.fetch_add(1, Ordering::AcqRel);
            match reader.try_set_result(PriorityItem::new(priority, item)) {
                Ok(()) => {
                    self.count.fetch_sub(1, Ordering::AcqRel);
                    return true;
                }
                Err(bounced) => {
                    // Reader had already been cancelled; undo the speculative
                    // increment above before retrying against the next
                    // blocked reader (or storing, once the deque is
                    // exhausted) — otherwise each bounce leaks one count.
                    self.count.fetch_sub(1, Ordering::AcqRel);
                    trace!("blocked reader raced cancellation, retrying delivery");
                    let (p, it) = bounced.into_inner();
                    priority = p;
                    item = it;
                }
            }
        }
    }

    pub async fn write(&self, priority: P, item: T, cancel: CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PriorityError::Cancelled);
        }
        if self.try_write(priority, item) {
            Ok(())
        } else {
            Err(PriorityError::Closed)
        }
    }

    pub async fn wait_to_write(&self, cancel: CancelToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(PriorityError::Cancelled);
        }
        Ok(!self.is_closed())
    }

    // ---- completion (spec §4.5 "Completion") -----------------------------

    pub fn try_complete(&self, error: Option<PriorityError>) -> bool {
        let (to_fail, to_wake, now_empty) = {
            let mut state = self.lock.lock();
            if state.done_writing.is_some() {
                return false;
            }
            state.done_writing = Some(error.clone());
            let to_fail = state.blocked_readers.drain();
            let to_wake = std::mem::take(&mut state.read_waiters);
            let now_empty = self.store.len() == 0;
            (to_fail, to_wake, now_empty)
        };
        let fail_err = error.clone().unwrap_or(PriorityError::Closed);
        for reader in to_fail {
            reader.try_set_exception(fail_err.clone());
        }
        for waiter in to_wake {
            waiter.try_set_result(false).ok();
        }
        if now_empty {
            self.signal_completion(error);
        }
        true
    }

    fn signal_completion(&self, error: Option<PriorityError>) {
        if self.completion.done.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.completion.result.lock() = Some(match error {
            None => Ok(()),
            Some(e) => Err(e),
        });
        self.completion.notify.notify_waiters();
    }

    /// Called after any successful dequeue/remove: a channel that is closed
    /// and has just become empty must complete its completion promise now,
    /// not only at the moment `try_complete` itself ran.
    fn maybe_signal_completion_after_drain(&self) {
        let done_writing = self.lock.lock().done_writing.clone();
        if let Some(err) = done_writing {
            if self.store.len() == 0 {
                self.signal_completion(err);
            }
        }
    }

    pub async fn completion(&self) -> Result<()> {
        loop {
            if self.completion.done.load(Ordering::Acquire) {
                break;
            }
            let notified = self.completion.notify.notified();
            if self.completion.done.load(Ordering::Acquire) {
                break;
            }
            notified.await;
        }
        match self.completion.result.lock().clone() {
            Some(result) => result,
            None => unreachable!("done is only set after the result is stored"),
        }
    }

    // ---- read path (spec §4.5 "Read path") -------------------------------

    fn on_successful_dequeue(&self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
        self.maybe_signal_completion_after_drain();
    }

    pub fn try_read(&self) -> Option<PriorityItem<T, P>> {
        if let Some((p, item)) = self.store.try_dequeue() {
            self.on_successful_dequeue();
            return Some(PriorityItem::new(p, item));
        }
        let found = {
            let _state = self.lock.lock();
            self.store.try_dequeue()
        };
        found.map(|(p, item)| {
            self.on_successful_dequeue();
            PriorityItem::new(p, item)
        })
    }

    pub async fn read(&self, cancel: CancelToken) -> Result<PriorityItem<T, P>> {
        if let Some(item) = self.try_read() {
            return Ok(item);
        }
        if cancel.is_cancelled() {
            return Err(PriorityError::Cancelled);
        }
        let (op, cancellable) = {
            let mut state = self.lock.lock();
            if let Some((p, item)) = self.store.try_dequeue() {
                drop(state);
                self.on_successful_dequeue();
                return Ok(PriorityItem::new(p, item));
            }
            if let Some(err) = state.done_writing.clone() {
                return Err(err.unwrap_or(PriorityError::Closed));
            }
            let cancellable = cancel.can_cancel();
            let op = if cancellable {
                AsyncOperation::new(true, false)
            } else {
                self.pooled_reader.acquire()
            };
            state.blocked_readers.push_back(op.clone());
            (op, cancellable)
        };
        if cancellable {
            let op = op.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                op.try_set_canceled();
            });
        }
        OperationHandle::new(op).await
    }

    pub async fn wait_to_read(&self, cancel: CancelToken) -> Result<bool> {
        if self.store.len() > 0 {
            return Ok(true);
        }
        if cancel.is_cancelled() {
            return Err(PriorityError::Cancelled);
        }
        let op = {
            let mut state = self.lock.lock();
            if self.store.len() > 0 {
                return Ok(true);
            }
            if state.done_writing.is_some() {
                return Ok(false);
            }
            let op = AsyncOperation::<bool>::new(true, false);
            state.read_waiters.push(op.clone());
            op
        };
        let op2 = op.clone();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            cancel2.cancelled().await;
            op2.try_set_canceled();
        });
        OperationHandle::new(op).await
    }

    pub fn try_peek(&self) -> Option<PriorityItem<T, P>>
    where
        T: Clone,
    {
        self.store.try_peek().map(|(p, item)| PriorityItem::new(p, item))
    }

    pub fn try_remove(&self, target: PriorityItem<T, P>) -> bool
    where
        T: PartialEq,
    {
        let (priority, item) = target.into_inner();
        if self.store.try_remove(&priority, &item) {
            self.on_successful_dequeue();
            true
        } else {
            false
        }
    }

    pub fn to_array(&self) -> Vec<PriorityItem<T, P>>
    where
        T: Clone,
    {
        self.store
            .to_array()
            .into_iter()
            .map(|(p, item)| PriorityItem::new(p, item))
            .collect()
    }
}
