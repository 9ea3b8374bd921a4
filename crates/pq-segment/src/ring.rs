//! Fixed-capacity, power-of-two MPMC segment ring (spec component C1).
//!
//! Each slot carries a sequence number that encodes its generation, plus two
//! tag bits: `CLAIM` (a short-lived exclusive-ownership marker used by both
//! `try_dequeue` and `try_remove` so the two operations never touch the same
//! payload concurrently) and `REMOVED` (a logical tombstone left by
//! `try_remove`, skipped by a later `try_dequeue`). `tail`'s own top bit
//! doubles as the "frozen for enqueues" flag: `ensure_frozen_for_enqueues`
//! just OR's it in, which is naturally idempotent and makes every subsequent
//! `try_enqueue` fail the ordinary capacity check without a second atomic
//! load on the hot path.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

const CLAIM_BIT: usize = 1 << (usize::BITS - 2);
const REMOVED_BIT: usize = 1 << (usize::BITS - 1);
const TAG_BITS: usize = CLAIM_BIT | REMOVED_BIT;
const FROZEN_BIT: usize = 1 << (usize::BITS - 1);

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// What a dequeue attempt found.
pub enum Dequeued<T> {
    /// An item was removed and returned.
    Item(T),
    /// The live range is skipped-tombstones only so far; caller should retry
    /// the same segment (head advanced, no item yet).
    Retry,
    /// The segment is empty but still open for more enqueues.
    Empty,
    /// The segment is frozen and every slot up to its final tail has been
    /// drained; the segmented queue should unlink it.
    Drained,
}

/// A fixed power-of-two-capacity MPMC ring buffer implementing the slot
/// sequence protocol described in `spec.md` §4.1.
pub struct Segment<T> {
    mask: usize,
    capacity: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
    /// Set while a `to_array`/enumeration snapshot is walking this segment's
    /// live range; suppresses slot recycling so sequence numbers stay stable
    /// for the observer (spec §4.2 "Enumeration").
    preserved: CachePadded<std::sync::atomic::AtomicBool>,
}

unsafe impl<T: Send> Send for Segment<T> {}
unsafe impl<T: Send> Sync for Segment<T> {}

impl<T> Segment<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "segment capacity must be a power of two");
        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            mask: capacity - 1,
            capacity,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            slots,
            preserved: CachePadded::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn real_tail(raw: usize) -> usize {
        raw & !FROZEN_BIT
    }

    fn is_frozen(raw: usize) -> bool {
        raw & FROZEN_BIT != 0
    }

    /// Idempotent: marks the segment closed to further enqueues. Dequeues
    /// keep draining the range that existed at the moment of the call.
    pub fn ensure_frozen_for_enqueues(&self) {
        self.tail.fetch_or(FROZEN_BIT, Ordering::AcqRel);
    }

    pub fn is_frozen_for_enqueues(&self) -> bool {
        Self::is_frozen(self.tail.load(Ordering::Acquire))
    }

    /// Best-effort occupancy, for diagnostics (`Debug`) and `SegmentedQueue::count`.
    pub fn approx_len(&self) -> usize {
        let h = self.head.load(Ordering::Acquire);
        let t = Self::real_tail(self.tail.load(Ordering::Acquire));
        t.saturating_sub(h)
    }

    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        let backoff = Backoff::new();
        loop {
            let raw = self.tail.load(Ordering::Acquire);
            if Self::is_frozen(raw) {
                return Err(item);
            }
            let t = raw;
            let h = self.head.load(Ordering::Acquire);
            if t.wrapping_sub(h) >= self.capacity {
                return Err(item); // full; caller grows the segmented queue
            }
            let idx = t & self.mask;
            let seq = self.slots[idx].seq.load(Ordering::Acquire);
            if seq == t {
                match self.tail.compare_exchange_weak(
                    raw,
                    t + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        unsafe {
                            (*self.slots[idx].value.get()).write(item);
                        }
                        // Publish: readers may now observe this slot.
                        self.slots[idx].seq.store(t + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(_) => {
                        backoff.spin();
                        continue;
                    }
                }
            } else {
                // Another writer is still publishing the previous lap, or a
                // stale read; spin briefly and retry.
                backoff.spin();
            }
        }
    }

    pub fn try_dequeue(&self) -> Dequeued<T> {
        let backoff = Backoff::new();
        loop {
            let h = self.head.load(Ordering::Acquire);
            let raw_tail = self.tail.load(Ordering::Acquire);
            let real_tail = Self::real_tail(raw_tail);
            if h >= real_tail {
                return if Self::is_frozen(raw_tail) {
                    Dequeued::Drained
                } else {
                    Dequeued::Empty
                };
            }
            let idx = h & self.mask;
            let expected_full = h + 1;
            let seq = self.slots[idx].seq.load(Ordering::Acquire);

            if seq == expected_full {
                let claimed = expected_full | CLAIM_BIT;
                if self.slots[idx]
                    .seq
                    .compare_exchange(expected_full, claimed, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let value = unsafe { (*self.slots[idx].value.get()).assume_init_read() };
                    self.head.store(h + 1, Ordering::Release);
                    self.recycle(idx, h, false);
                    return Dequeued::Item(value);
                }
                backoff.spin();
                continue;
            }

            if seq == (expected_full | REMOVED_BIT) {
                let claimed = expected_full | REMOVED_BIT | CLAIM_BIT;
                if self.slots[idx]
                    .seq
                    .compare_exchange(
                        expected_full | REMOVED_BIT,
                        claimed,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.head.store(h + 1, Ordering::Release);
                    self.recycle(idx, h, true);
                    return Dequeued::Retry;
                }
                backoff.spin();
                continue;
            }

            // seq == h: writer claimed the slot but has not published yet.
            backoff.spin();
        }
    }

    fn recycle(&self, idx: usize, h: usize, _was_tombstone: bool) {
        if self.preserved.load(Ordering::Acquire) {
            // Leave the sequence number at the published value so an
            // in-flight enumeration can still validate it; it gets a later
            // chance once the enumeration finishes and clears `preserved`.
            return;
        }
        self.slots[idx].seq.store(h + self.capacity, Ordering::Release);
    }

    /// Non-destructive read of the oldest live item, used by `try_peek` and
    /// by the channel's `TryPeek`.
    pub fn try_peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let h = self.head.load(Ordering::Acquire);
        let idx = h & self.mask;
        let seq = self.slots[idx].seq.load(Ordering::Acquire);
        if seq == h + 1 {
            Some(unsafe { (*self.slots[idx].value.get()).assume_init_ref().clone() })
        } else {
            None
        }
    }

    /// Scans the live range for an item equal to `target`, removes the first
    /// match by tagging its slot's sequence number with the tombstone bit,
    /// and returns whether anything was removed. O(capacity); see spec §4.1.
    pub fn try_remove(&self, target: &T) -> bool
    where
        T: PartialEq,
    {
        let h = self.head.load(Ordering::Acquire);
        let raw_tail = self.tail.load(Ordering::Acquire);
        let real_tail = Self::real_tail(raw_tail);
        let mut i = real_tail;
        while i > h {
            i -= 1;
            let idx = i & self.mask;
            let expected_full = i + 1;
            let seq = self.slots[idx].seq.load(Ordering::Acquire);
            if seq != expected_full {
                continue;
            }
            let claimed = expected_full | CLAIM_BIT;
            if self.slots[idx]
                .seq
                .compare_exchange(expected_full, claimed, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Lost the race (a concurrent dequeue or remove claimed it
                // first); the item is gone from this slot either way.
                continue;
            }
            // Only now is the payload exclusively ours to read — a
            // concurrent try_dequeue on this index cannot win the same CAS.
            let matches = unsafe { (*self.slots[idx].value.get()).assume_init_ref() == target };
            if !matches {
                // Not the target; restore the slot so try_dequeue can still
                // claim and recycle it normally.
                self.slots[idx].seq.store(expected_full, Ordering::Release);
                continue;
            }
            unsafe {
                (*self.slots[idx].value.get()).assume_init_drop();
            }
            self.slots[idx]
                .seq
                .store(expected_full | REMOVED_BIT, Ordering::Release);
            return true;
        }
        false
    }

    /// Scans the live range and returns up to `out`'s capacity worth of
    /// clones, oldest first, without consuming anything. Used by
    /// `SegmentedQueue::to_array`.
    pub fn snapshot_into(&self, out: &mut Vec<T>)
    where
        T: Clone,
    {
        let h = self.head.load(Ordering::Acquire);
        let raw_tail = self.tail.load(Ordering::Acquire);
        let real_tail = Self::real_tail(raw_tail);
        for i in h..real_tail {
            let idx = i & self.mask;
            let expected_full = i + 1;
            let backoff = Backoff::new();
            loop {
                let seq = self.slots[idx].seq.load(Ordering::Acquire);
                if seq == expected_full {
                    out.push(unsafe { (*self.slots[idx].value.get()).assume_init_ref().clone() });
                    break;
                }
                if seq & TAG_BITS != 0 || seq != i {
                    // Removed, claimed, or already recycled by the time we
                    // got here: nothing stable to observe at this index.
                    break;
                }
                backoff.snooze();
            }
        }
    }

    pub fn begin_preserve(&self) {
        self.preserved.store(true, Ordering::Release);
    }

    pub fn end_preserve(&self) {
        self.preserved.store(false, Ordering::Release);
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        let h = self.head.load(Ordering::Acquire);
        let real_tail = Self::real_tail(self.tail.load(Ordering::Acquire));
        let mut i = h;
        while i < real_tail {
            let idx = i & self.mask;
            let seq = self.slots[idx].seq.load(Ordering::Acquire);
            if seq == i + 1 {
                unsafe {
                    (*self.slots[idx].value.get()).assume_init_drop();
                }
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dequeue_fifo() {
        let seg: Segment<i32> = Segment::new(8);
        for i in 0..8 {
            assert!(seg.try_enqueue(i).is_ok());
        }
        assert!(seg.try_enqueue(99).is_err(), "segment should be full");
        for i in 0..8 {
            match seg.try_dequeue() {
                Dequeued::Item(v) => assert_eq!(v, i),
                _ => panic!("expected item {i}"),
            }
        }
        assert!(matches!(seg.try_dequeue(), Dequeued::Empty));
    }

    #[test]
    fn freeze_blocks_enqueue_but_drains() {
        let seg: Segment<i32> = Segment::new(4);
        seg.try_enqueue(1).unwrap();
        seg.try_enqueue(2).unwrap();
        seg.ensure_frozen_for_enqueues();
        assert!(seg.try_enqueue(3).is_err());
        // idempotent
        seg.ensure_frozen_for_enqueues();
        match seg.try_dequeue() {
            Dequeued::Item(v) => assert_eq!(v, 1),
            _ => panic!(),
        }
        match seg.try_dequeue() {
            Dequeued::Item(v) => assert_eq!(v, 2),
            _ => panic!(),
        }
        assert!(matches!(seg.try_dequeue(), Dequeued::Drained));
    }

    #[test]
    fn remove_then_dequeue_skips_tombstone() {
        let seg: Segment<i32> = Segment::new(8);
        for i in 0..4 {
            seg.try_enqueue(i).unwrap();
        }
        assert!(seg.try_remove(&2));
        assert!(!seg.try_remove(&2), "already removed");
        let mut drained = Vec::new();
        loop {
            match seg.try_dequeue() {
                Dequeued::Item(v) => drained.push(v),
                Dequeued::Retry => continue,
                Dequeued::Empty | Dequeued::Drained => break,
            }
        }
        assert_eq!(drained, vec![0, 1, 3]);
    }

    #[test]
    fn peek_does_not_consume() {
        let seg: Segment<i32> = Segment::new(4);
        seg.try_enqueue(7).unwrap();
        assert_eq!(seg.try_peek(), Some(7));
        assert_eq!(seg.try_peek(), Some(7));
        match seg.try_dequeue() {
            Dequeued::Item(v) => assert_eq!(v, 7),
            _ => panic!(),
        }
    }

    #[test]
    fn concurrent_enqueue_dequeue_preserves_multiset() {
        use std::sync::Arc;
        use std::thread;

        let seg = Arc::new(Segment::<u64>::new(1024));
        let producers = 4;
        let per_producer = 200u64;
        let mut handles = Vec::new();
        for p in 0..producers {
            let seg = seg.clone();
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    while seg.try_enqueue(p * per_producer + i).is_err() {
                        thread::yield_now();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut out = Vec::new();
        loop {
            match seg.try_dequeue() {
                Dequeued::Item(v) => out.push(v),
                Dequeued::Retry => continue,
                Dequeued::Empty | Dequeued::Drained => break,
            }
        }
        out.sort_unstable();
        let expected: Vec<u64> = (0..producers * per_producer).collect();
        assert_eq!(out, expected);
    }
}
