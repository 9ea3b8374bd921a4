//! The backing store a channel rendezvouses against: `queues[0..K)` for the
//! fixed-priority channel (C8), a single [`pq_heap::ConcurrentPriorityQueue`]
//! for the dynamic-priority channel (C9). [`Store`] lets
//! [`crate::core::ChannelCore`] share one rendezvous implementation across
//! both shapes (spec §9 "capability contracts" note, applied one layer down
//! from the reader/writer split).

use pq_heap::ConcurrentPriorityQueue;
use pq_segment::SegmentedQueue;

/// A priority-ordered backing store a channel can enqueue into and dequeue
/// the next-highest-priority item from.
pub trait Store<T, P>: Send + Sync {
    fn enqueue(&self, priority: P, item: T);
    fn try_dequeue(&self) -> Option<(P, T)>;
    fn try_peek(&self) -> Option<(P, T)>
    where
        T: Clone,
        P: Clone;
    fn try_remove(&self, priority: &P, item: &T) -> bool
    where
        T: PartialEq;
    fn len(&self) -> usize;
    fn to_array(&self) -> Vec<(P, T)>
    where
        T: Clone,
        P: Clone;
}

/// `K` concurrent FIFO queues, one per fixed integer priority level,
/// drained in ascending level order (spec §4.5).
pub struct FixedStore<T> {
    queues: Vec<SegmentedQueue<T>>,
}

impl<T> FixedStore<T> {
    pub fn new(levels: usize) -> Self {
        assert!(levels > 0, "a fixed-priority channel needs at least one level");
        let mut queues = Vec::with_capacity(levels);
        queues.resize_with(levels, SegmentedQueue::new);
        Self { queues }
    }

    pub fn levels(&self) -> usize {
        self.queues.len()
    }
}

impl<T: Send + Sync> Store<T, i64> for FixedStore<T> {
    fn enqueue(&self, priority: i64, item: T) {
        let level = level_index(priority, self.queues.len());
        self.queues[level].enqueue(item);
    }

    fn try_dequeue(&self) -> Option<(i64, T)> {
        for (level, queue) in self.queues.iter().enumerate() {
            if let Some(item) = queue.try_dequeue() {
                return Some((level as i64, item));
            }
        }
        None
    }

    fn try_peek(&self) -> Option<(i64, T)>
    where
        T: Clone,
    {
        for (level, queue) in self.queues.iter().enumerate() {
            if let Some(item) = queue.try_peek() {
                return Some((level as i64, item));
            }
        }
        None
    }

    fn try_remove(&self, priority: &i64, item: &T) -> bool
    where
        T: PartialEq,
    {
        let level = level_index(*priority, self.queues.len());
        self.queues[level].try_remove(item)
    }

    fn len(&self) -> usize {
        self.queues.iter().map(SegmentedQueue::len).sum()
    }

    fn to_array(&self) -> Vec<(i64, T)>
    where
        T: Clone,
    {
        let mut out = Vec::new();
        for (level, queue) in self.queues.iter().enumerate() {
            out.extend(queue.to_array().into_iter().map(|item| (level as i64, item)));
        }
        out
    }
}

fn level_index(priority: i64, levels: usize) -> usize {
    assert!(
        priority >= 0 && (priority as usize) < levels,
        "priority {priority} out of range [0, {levels})"
    );
    priority as usize
}

/// A single global [`ConcurrentPriorityQueue`], draining strictly by
/// `(priority, insertion_index)` (spec §4.6).
pub struct DynamicStore<T> {
    heap: ConcurrentPriorityQueue<T, f64>,
}

impl<T> DynamicStore<T> {
    pub fn new() -> Self {
        Self {
            heap: ConcurrentPriorityQueue::new(),
        }
    }
}

impl<T> Default for DynamicStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync> Store<T, f64> for DynamicStore<T> {
    fn enqueue(&self, priority: f64, item: T) {
        self.heap.enqueue(priority, item);
    }

    fn try_dequeue(&self) -> Option<(f64, T)> {
        self.heap.try_dequeue()
    }

    fn try_peek(&self) -> Option<(f64, T)>
    where
        T: Clone,
    {
        self.heap.try_peek()
    }

    fn try_remove(&self, priority: &f64, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.heap.try_remove_matching(priority, item)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn to_array(&self) -> Vec<(f64, T)>
    where
        T: Clone,
    {
        self.heap.to_sorted_vec()
    }
}
