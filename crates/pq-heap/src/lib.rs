//! Concurrent priority queue (spec component C3), heap variant.
//!
//! An indexed binary min-heap ordered on `(priority, insertion_index)`,
//! guarded by a single `parking_lot::RwLock`: `peek`/`contains` take the
//! shared lock, every mutator takes the exclusive lock. Each entry keeps a
//! back-pointer (an `Arc<AtomicUsize>` shared with the caller's [`Handle`])
//! to its current heap slot, giving `update_priority`/`remove` O(log n)
//! instead of a linear scan.
//!
//! The heap variant is the Open Question resolution documented in
//! `SPEC_FULL.md` §4.3 / `DESIGN.md`: this workload removes/reprioritizes
//! about as often as it enqueues (every cancelled parked reader or
//! re-priced item goes through `remove`/`update_priority`), so O(log n)
//! updates win over the segmented scan's O(capacity) peek.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use pq_core::{PriorityError, Result};

const NOT_PRESENT: usize = usize::MAX;

/// A handle to a previously enqueued item, used to `update_priority` or
/// `remove` it in O(log n) without re-scanning the heap.
#[derive(Clone)]
pub struct Handle(Arc<AtomicUsize>);

impl Handle {
    fn index(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn set_index(&self, idx: usize) {
        self.0.store(idx, Ordering::Release);
    }

    /// Whether the item this handle refers to is still tracked by the queue.
    pub fn is_present(&self) -> bool {
        self.index() != NOT_PRESENT
    }
}

struct Entry<T, P> {
    priority: P,
    insertion_index: u64,
    item: T,
    handle: Arc<AtomicUsize>,
}

fn less_than<P: PartialOrd>(a_prio: &P, a_idx: u64, b_prio: &P, b_idx: u64) -> bool {
    match a_prio.partial_cmp(b_prio) {
        Some(std::cmp::Ordering::Less) => true,
        Some(std::cmp::Ordering::Greater) => false,
        _ => a_idx < b_idx,
    }
}

struct Inner<T, P> {
    heap: Vec<Entry<T, P>>,
}

impl<T, P: PartialOrd> Inner<T, P> {
    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.heap[i].handle.store(i, Ordering::Release);
        self.heap[j].handle.store(j, Ordering::Release);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if less_than(
                &self.heap[i].priority,
                self.heap[i].insertion_index,
                &self.heap[parent].priority,
                self.heap[parent].insertion_index,
            ) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let l = 2 * i + 1;
            let r = 2 * i + 2;
            let mut smallest = i;
            if l < len
                && less_than(
                    &self.heap[l].priority,
                    self.heap[l].insertion_index,
                    &self.heap[smallest].priority,
                    self.heap[smallest].insertion_index,
                )
            {
                smallest = l;
            }
            if r < len
                && less_than(
                    &self.heap[r].priority,
                    self.heap[r].insertion_index,
                    &self.heap[smallest].priority,
                    self.heap[smallest].insertion_index,
                )
            {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn remove_at(&mut self, idx: usize) -> Entry<T, P> {
        let last = self.heap.len() - 1;
        self.swap(idx, last);
        let removed = self.heap.pop().expect("heap non-empty");
        removed.handle.store(NOT_PRESENT, Ordering::Release);
        if idx < self.heap.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        removed
    }
}

/// Concurrent indexed binary min-heap ordered on `(priority, insertion_index)`.
pub struct ConcurrentPriorityQueue<T, P = f64> {
    inner: RwLock<Inner<T, P>>,
    next_insertion_index: AtomicU64,
}

impl<T, P: PartialOrd + Clone> ConcurrentPriorityQueue<T, P> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner { heap: Vec::new() }),
            next_insertion_index: AtomicU64::new(0),
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                heap: Vec::with_capacity(cap),
            }),
            next_insertion_index: AtomicU64::new(0),
        }
    }

    /// Enqueues `item` with the given `priority`, returning a handle for
    /// later `update_priority`/`remove` calls.
    pub fn enqueue(&self, priority: P, item: T) -> Handle {
        let insertion_index = self.next_insertion_index.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(AtomicUsize::new(NOT_PRESENT));
        let mut guard = self.inner.write();
        let idx = guard.heap.len();
        handle.store(idx, Ordering::Release);
        guard.heap.push(Entry {
            priority,
            insertion_index,
            item,
            handle: handle.clone(),
        });
        guard.sift_up(idx);
        Handle(handle)
    }

    /// Removes and returns the minimum `(priority, item)` pair.
    pub fn dequeue(&self) -> Result<(P, T)> {
        let mut guard = self.inner.write();
        if guard.heap.is_empty() {
            return Err(PriorityError::Empty);
        }
        let removed = guard.remove_at(0);
        Ok((removed.priority, removed.item))
    }

    pub fn try_dequeue(&self) -> Option<(P, T)> {
        self.dequeue().ok()
    }

    pub fn peek(&self) -> Result<(P, T)>
    where
        T: Clone,
    {
        let guard = self.inner.read();
        guard
            .heap
            .first()
            .map(|e| (e.priority.clone(), e.item.clone()))
            .ok_or(PriorityError::Empty)
    }

    pub fn try_peek(&self) -> Option<(P, T)>
    where
        T: Clone,
    {
        self.peek().ok()
    }

    /// Re-heapifies `handle`'s entry at `new_priority`. O(log n).
    pub fn update_priority(&self, handle: &Handle, new_priority: P) -> Result<()> {
        let mut guard = self.inner.write();
        let idx = handle.index();
        if idx == NOT_PRESENT || idx >= guard.heap.len() {
            return Err(PriorityError::NotPresent);
        }
        guard.heap[idx].priority = new_priority;
        guard.sift_up(idx);
        guard.sift_down(idx);
        Ok(())
    }

    /// Removes `handle`'s entry wherever it currently sits. O(log n).
    pub fn remove(&self, handle: &Handle) -> Result<(P, T)> {
        let mut guard = self.inner.write();
        let idx = handle.index();
        if idx == NOT_PRESENT || idx >= guard.heap.len() {
            return Err(PriorityError::NotPresent);
        }
        let removed = guard.remove_at(idx);
        Ok((removed.priority, removed.item))
    }

    /// Removes the first entry whose item equals `target`. O(n); exposed for
    /// the channel's by-value `TryRemove`, which does not carry a [`Handle`].
    pub fn try_remove_value(&self, target: &T) -> bool
    where
        T: PartialEq,
    {
        let mut guard = self.inner.write();
        let idx = guard.heap.iter().position(|e| &e.item == target);
        match idx {
            Some(idx) => {
                guard.remove_at(idx);
                true
            }
            None => false,
        }
    }

    /// Removes the first entry whose `(priority, item)` pair equals the
    /// target. O(n); backs the dynamic channel's `TryRemove(PriorityItem)`,
    /// whose structural equality spans both fields, not just the payload.
    pub fn try_remove_matching(&self, priority: &P, target: &T) -> bool
    where
        T: PartialEq,
        P: PartialEq,
    {
        let mut guard = self.inner.write();
        let idx = guard
            .heap
            .iter()
            .position(|e| &e.priority == priority && &e.item == target);
        match idx {
            Some(idx) => {
                guard.remove_at(idx);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every live `(priority, item)` pair, sorted by
    /// `(priority, insertion_index)` — the order `ToArray` should present
    /// even though the backing heap's own array order is unspecified.
    pub fn to_sorted_vec(&self) -> Vec<(P, T)>
    where
        T: Clone,
    {
        let guard = self.inner.read();
        let mut entries: Vec<&Entry<T, P>> = guard.heap.iter().collect();
        entries.sort_by(|a, b| {
            if less_than(&a.priority, a.insertion_index, &b.priority, b.insertion_index) {
                std::cmp::Ordering::Less
            } else if less_than(&b.priority, b.insertion_index, &a.priority, a.insertion_index) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        entries
            .into_iter()
            .map(|e| (e.priority.clone(), e.item.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live `(priority, item)` pair, heap order (not
    /// necessarily sorted). Used by `to_array`; callers that want strict
    /// priority order should sort the result.
    pub fn to_vec(&self) -> Vec<(P, T)>
    where
        T: Clone,
    {
        self.inner
            .read()
            .heap
            .iter()
            .map(|e| (e.priority.clone(), e.item.clone()))
            .collect()
    }

    /// Verifies the min-heap invariant on `(priority, insertion_index)` holds
    /// for every node. Used by the testable-property suite (spec §8,
    /// property 4, `IsValidQueue`).
    #[cfg(any(test, feature = "test-utils"))]
    pub fn is_valid_heap(&self) -> bool {
        let guard = self.inner.read();
        for i in 1..guard.heap.len() {
            let parent = (i - 1) / 2;
            if less_than(
                &guard.heap[i].priority,
                guard.heap[i].insertion_index,
                &guard.heap[parent].priority,
                guard.heap[parent].insertion_index,
            ) {
                return false;
            }
            if guard.heap[i].handle.load(Ordering::Acquire) != i {
                return false;
            }
        }
        true
    }
}

impl<T, P: PartialOrd + Clone> Default for ConcurrentPriorityQueue<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeues_in_priority_then_insertion_order() {
        let q: ConcurrentPriorityQueue<&str, f64> = ConcurrentPriorityQueue::new();
        q.enqueue(1.5, "x");
        q.enqueue(1.5, "y");
        q.enqueue(0.5, "z");
        assert_eq!(q.dequeue().unwrap(), (0.5, "z"));
        assert_eq!(q.dequeue().unwrap(), (1.5, "x"));
        assert_eq!(q.dequeue().unwrap(), (1.5, "y"));
        assert!(q.dequeue().is_err());
    }

    #[test]
    fn update_priority_reheapifies() {
        let q: ConcurrentPriorityQueue<&str, f64> = ConcurrentPriorityQueue::new();
        let a = q.enqueue(5.0, "a");
        q.enqueue(1.0, "b");
        q.update_priority(&a, 0.0).unwrap();
        assert!(q.is_valid_heap());
        assert_eq!(q.dequeue().unwrap().1, "a");
    }

    #[test]
    fn remove_by_handle() {
        let q: ConcurrentPriorityQueue<&str, f64> = ConcurrentPriorityQueue::new();
        let a = q.enqueue(1.0, "a");
        q.enqueue(2.0, "b");
        assert_eq!(q.remove(&a).unwrap().1, "a");
        assert!(q.remove(&a).is_err());
        assert!(q.is_valid_heap());
    }

    #[test]
    fn remove_by_value() {
        let q: ConcurrentPriorityQueue<i32, f64> = ConcurrentPriorityQueue::new();
        q.enqueue(1.0, 10);
        q.enqueue(2.0, 20);
        assert!(q.try_remove_value(&20));
        assert!(!q.try_remove_value(&20));
        assert!(q.is_valid_heap());
    }

    #[test]
    fn remove_matching_checks_both_priority_and_item() {
        let q: ConcurrentPriorityQueue<i32, f64> = ConcurrentPriorityQueue::new();
        q.enqueue(1.0, 10);
        q.enqueue(2.0, 10);
        assert!(!q.try_remove_matching(&5.0, &10));
        assert!(q.try_remove_matching(&1.0, &10));
        assert_eq!(q.dequeue().unwrap(), (2.0, 10));
    }

    #[test]
    fn to_sorted_vec_matches_drain_order() {
        let q: ConcurrentPriorityQueue<&str, f64> = ConcurrentPriorityQueue::new();
        q.enqueue(1.5, "x");
        q.enqueue(1.5, "y");
        q.enqueue(0.5, "z");
        assert_eq!(q.to_sorted_vec(), vec![(0.5, "z"), (1.5, "x"), (1.5, "y")]);
        assert_eq!(q.len(), 3, "snapshot must not consume items");
    }

    #[test]
    fn randomized_round_trip_matches_stable_sort() {
        let q: ConcurrentPriorityQueue<u64, i64> = ConcurrentPriorityQueue::new();
        let mut inputs = Vec::new();
        for i in 0..500u64 {
            let p = fastrand::i64(0..20);
            inputs.push((p, i));
            q.enqueue(p, i);
        }
        let mut expected = inputs.clone();
        expected.sort_by_key(|&(p, i)| (p, i));
        let mut actual = Vec::new();
        while let Ok((p, v)) = q.dequeue() {
            actual.push((p, v));
        }
        assert_eq!(actual, expected);
    }
}
