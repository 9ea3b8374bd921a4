//! Double-ended waiter queue (spec component C5).
//!
//! Deliberately *not* thread-safe: the spec requires it be used only while
//! the owning channel's own lock is held, so a plain `VecDeque` is the
//! correct (and fastest) choice — wrapping it in another lock here would
//! just be redundant synchronization.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::op::AsyncOperation;

pub struct WaiterQueue<T> {
    waiters: VecDeque<Arc<AsyncOperation<T>>>,
}

impl<T> WaiterQueue<T> {
    pub fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    pub fn push_back(&mut self, op: Arc<AsyncOperation<T>>) {
        self.waiters.push_back(op);
    }

    pub fn pop_front(&mut self) -> Option<Arc<AsyncOperation<T>>> {
        self.waiters.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn drain(&mut self) -> VecDeque<Arc<AsyncOperation<T>>> {
        std::mem::take(&mut self.waiters)
    }
}

impl<T> Default for WaiterQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
