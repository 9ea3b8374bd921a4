//! Segmented, unbounded MPMC queue built from linked [`Segment`]s (spec
//! component C2).

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;

use crate::ring::{Dequeued, Segment};

const DEFAULT_INITIAL_CAPACITY: usize = 32;
const DEFAULT_MAX_CAPACITY: usize = 1 << 20; // 1 MiB slots, per spec §3.

struct Node<T> {
    segment: Segment<T>,
    next: ArcSwapOption<Node<T>>,
}

impl<T> Node<T> {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            segment: Segment::new(capacity),
            next: ArcSwapOption::from(None),
        })
    }
}

/// A growable queue of [`Segment`]s. Enqueue appends larger segments (doubling
/// up to `max_segment_capacity`) when the current tail segment is full;
/// dequeue unlinks drained head segments.
pub struct SegmentedQueue<T> {
    head: ArcSwap<Node<T>>,
    tail: ArcSwap<Node<T>>,
    structural: Mutex<()>,
    max_segment_capacity: usize,
}

impl<T> SegmentedQueue<T> {
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacities(initial_capacity: usize, max_segment_capacity: usize) -> Self {
        let initial_capacity = initial_capacity.next_power_of_two().max(1);
        let node = Node::new(initial_capacity);
        Self {
            head: ArcSwap::from(node.clone()),
            tail: ArcSwap::from(node),
            structural: Mutex::new(()),
            max_segment_capacity,
        }
    }

    pub fn enqueue(&self, mut item: T) {
        loop {
            let tail_node = self.tail.load_full();
            match tail_node.segment.try_enqueue(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    let _guard = self.structural.lock();
                    let current_tail = self.tail.load_full();
                    if !Arc::ptr_eq(&current_tail, &tail_node) {
                        // Another writer already grew the queue; retry the
                        // fast path against the new tail.
                        continue;
                    }
                    current_tail.segment.ensure_frozen_for_enqueues();
                    let new_capacity =
                        (current_tail.segment.capacity() * 2).min(self.max_segment_capacity);
                    let new_node = Node::new(new_capacity.max(1));
                    current_tail.next.store(Some(new_node.clone()));
                    self.tail.store(new_node);
                    continue;
                }
            }
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        loop {
            let head_node = self.head.load_full();
            match head_node.segment.try_dequeue() {
                Dequeued::Item(v) => return Some(v),
                Dequeued::Retry => continue,
                Dequeued::Empty => {
                    if head_node.next.load_full().is_none() {
                        return None;
                    }
                    // A late enqueue may have landed between our check and
                    // the freeze; give the current head one more chance.
                    if let Dequeued::Item(v) = head_node.segment.try_dequeue() {
                        return Some(v);
                    }
                    self.advance_head(&head_node);
                    continue;
                }
                Dequeued::Drained => {
                    match head_node.next.load_full() {
                        None => return None,
                        Some(_) => {
                            self.advance_head(&head_node);
                            continue;
                        }
                    }
                }
            }
        }
    }

    fn advance_head(&self, observed: &Arc<Node<T>>) {
        let _guard = self.structural.lock();
        let current_head = self.head.load_full();
        if Arc::ptr_eq(&current_head, observed) {
            if let Some(next) = current_head.next.load_full() {
                self.head.store(next);
            }
        }
    }

    pub fn try_peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let mut node = self.head.load_full();
        loop {
            if let Some(v) = node.segment.try_peek() {
                return Some(v);
            }
            match node.next.load_full() {
                Some(next) => node = next,
                None => return None,
            }
        }
    }

    pub fn try_remove(&self, target: &T) -> bool
    where
        T: PartialEq,
    {
        let mut node = self.head.load_full();
        loop {
            if node.segment.try_remove(target) {
                return true;
            }
            match node.next.load_full() {
                Some(next) => node = next,
                None => return false,
            }
        }
    }

    /// Best-effort count: snapshots head/tail boundaries, retrying if a
    /// structural change (segment append/unlink) is observed mid-read, per
    /// spec §4.2.
    pub fn len(&self) -> usize {
        loop {
            let head_node = self.head.load_full();
            let tail_node = self.tail.load_full();
            let head_len = head_node.segment.approx_len();
            if Arc::ptr_eq(&head_node, &tail_node) {
                let head_node_again = self.head.load_full();
                if Arc::ptr_eq(&head_node_again, &head_node) {
                    return head_len;
                }
                continue;
            }
            let mut total = head_len;
            let mut node = head_node.clone();
            loop {
                let next = match node.next.load_full() {
                    Some(n) => n,
                    None => break,
                };
                total += next.segment.approx_len();
                if Arc::ptr_eq(&next, &tail_node) {
                    break;
                }
                node = next;
            }
            let head_node_again = self.head.load_full();
            if Arc::ptr_eq(&head_node_again, &head_node) {
                return total;
            }
            // Head moved mid-scan; retry for a consistent snapshot.
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots every live item, oldest first, pausing slot recycling on
    /// every segment in the chain for the duration of the walk (spec §4.2
    /// "Enumeration").
    pub fn to_array(&self) -> Vec<T>
    where
        T: Clone,
    {
        let _guard = self.structural.lock();
        let head_node = self.head.load_full();
        let tail_node = self.tail.load_full();
        tail_node.segment.ensure_frozen_for_enqueues();

        let mut nodes = vec![head_node.clone()];
        let mut node = head_node;
        while !Arc::ptr_eq(&node, &tail_node) {
            let next = match node.next.load_full() {
                Some(n) => n,
                None => break,
            };
            nodes.push(next.clone());
            node = next;
        }
        for n in &nodes {
            n.segment.begin_preserve();
        }
        let mut out = Vec::new();
        for n in &nodes {
            n.segment.snapshot_into(&mut out);
        }
        for n in &nodes {
            n.segment.end_preserve();
        }
        out
    }

    pub fn clear(&self) {
        while self.try_dequeue().is_some() {}
    }
}

impl<T> Default for SegmentedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_across_segments() {
        let q: SegmentedQueue<i32> = SegmentedQueue::with_capacities(2, 1024);
        for i in 0..50 {
            q.enqueue(i);
        }
        assert_eq!(q.len(), 50);
        for i in 0..50 {
            assert_eq!(q.try_dequeue(), Some(i));
        }
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn unlinks_drained_head_segments() {
        let q: SegmentedQueue<i32> = SegmentedQueue::with_capacities(4, 1024);
        for i in 0..20 {
            q.enqueue(i);
        }
        for i in 0..20 {
            assert_eq!(q.try_dequeue(), Some(i));
        }
        assert!(q.is_empty());
        q.enqueue(100);
        assert_eq!(q.try_dequeue(), Some(100));
    }

    #[test]
    fn to_array_is_snapshot_of_live_items() {
        let q: SegmentedQueue<i32> = SegmentedQueue::with_capacities(4, 1024);
        for i in 0..10 {
            q.enqueue(i);
        }
        let snap = q.to_array();
        assert_eq!(snap, (0..10).collect::<Vec<_>>());
        assert_eq!(q.len(), 10, "snapshotting must not consume items");
    }

    #[test]
    fn remove_across_segments() {
        let q: SegmentedQueue<i32> = SegmentedQueue::with_capacities(4, 1024);
        for i in 0..10 {
            q.enqueue(i);
        }
        assert!(q.try_remove(&7));
        assert!(!q.try_remove(&7));
        let mut out = Vec::new();
        while let Some(v) = q.try_dequeue() {
            out.push(v);
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 8, 9]);
    }

    #[test]
    fn concurrent_producers_consumers() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let q = StdArc::new(SegmentedQueue::<u64>::with_capacities(8, 256));
        let n_per_producer = 500u64;
        let producers = 4;
        let mut handles = Vec::new();
        for p in 0..producers {
            let q = q.clone();
            handles.push(thread::spawn(move || {
                for i in 0..n_per_producer {
                    q.enqueue(p * n_per_producer + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut out = Vec::new();
        while let Some(v) = q.try_dequeue() {
            out.push(v);
        }
        out.sort_unstable();
        assert_eq!(out, (0..producers * n_per_producer).collect::<Vec<_>>());
    }
}
