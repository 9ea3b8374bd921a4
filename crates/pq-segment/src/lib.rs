//! Lock-free segment ring (C1) and segmented concurrent queue (C2).
//!
//! This is the storage fabric used both as the per-level queue in the
//! fixed-priority channel and as the backing store scanned by the
//! segmented-scan variant of the concurrent priority queue.

mod queue;
mod ring;

pub use queue::SegmentedQueue;
pub use ring::{Dequeued, Segment};
