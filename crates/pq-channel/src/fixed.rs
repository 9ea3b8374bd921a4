//! Fixed K-level integer-priority channel (spec component C8).

use std::sync::Arc;

use pq_async::CancelToken;
use pq_core::{PriorityItem, Result};

use crate::core::ChannelCore;
use crate::stream::ReadStream;
use crate::store::FixedStore;

/// A priority-aware MPMC channel with `K` integer priority levels in
/// `[0, K)`, drained in ascending level order — level 0 is most urgent.
///
/// Internally, each level is its own [`pq_segment::SegmentedQueue`]; a write
/// that finds a parked reader hands the item to it directly instead of
/// touching any queue (the rendezvous protocol of `SPEC_FULL.md` §4.5).
/// Cloning a [`FixedPriorityChannel`] shares the same underlying channel —
/// cheap, `Arc`-backed, safe to hand to many producers and consumers.
///
/// # Examples
///
/// ```no_run
/// use pq_channel::FixedPriorityChannel;
/// use pq_core::PriorityItem;
///
/// # async fn run() {
/// let chan = FixedPriorityChannel::<&str>::new(3);
/// chan.try_write(PriorityItem::new(2, "low"));
/// chan.try_write(PriorityItem::new(0, "urgent"));
///
/// let first = chan.try_read().unwrap();
/// assert_eq!(first.item, "urgent");
/// # }
/// ```
pub struct FixedPriorityChannel<T> {
    core: Arc<ChannelCore<T, i64, FixedStore<T>>>,
    levels: usize,
}

impl<T> Clone for FixedPriorityChannel<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            levels: self.levels,
        }
    }
}

impl<T: Send + Sync + 'static> FixedPriorityChannel<T> {
    /// Creates a channel with `levels` priority levels (must be at least 1).
    ///
    /// # Panics
    ///
    /// Panics if `levels == 0` — an invariant violation, not a recoverable
    /// condition, per the crate's fail-fast policy for programmer errors.
    pub fn new(levels: usize) -> Self {
        assert!(levels > 0, "levels must be > 0");
        Self {
            core: Arc::new(ChannelCore::new(FixedStore::new(levels))),
            levels,
        }
    }

    /// The number of priority levels this channel was created with.
    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn try_write(&self, item: PriorityItem<T, i64>) -> bool {
        let (priority, payload) = item.into_inner();
        self.core.try_write(priority, payload)
    }

    pub async fn write(&self, item: PriorityItem<T, i64>, cancel: CancelToken) -> Result<()> {
        let (priority, payload) = item.into_inner();
        self.core.write(priority, payload, cancel).await
    }

    pub async fn wait_to_write(&self, cancel: CancelToken) -> Result<bool> {
        self.core.wait_to_write(cancel).await
    }

    /// Idempotent: returns `false` on every call after the first.
    pub fn try_complete(&self, error: Option<pq_core::PriorityError>) -> bool {
        self.core.try_complete(error)
    }

    pub fn try_read(&self) -> Option<PriorityItem<T, i64>> {
        self.core.try_read()
    }

    pub async fn read(&self, cancel: CancelToken) -> Result<PriorityItem<T, i64>> {
        self.core.read(cancel).await
    }

    pub async fn wait_to_read(&self, cancel: CancelToken) -> Result<bool> {
        self.core.wait_to_read(cancel).await
    }

    pub fn try_peek(&self) -> Option<PriorityItem<T, i64>>
    where
        T: Clone,
    {
        self.core.try_peek()
    }

    pub fn try_remove(&self, item: PriorityItem<T, i64>) -> bool
    where
        T: PartialEq,
    {
        self.core.try_remove(item)
    }

    pub fn count(&self) -> usize {
        self.core.count()
    }

    pub fn len(&self) -> usize {
        self.count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub async fn completion(&self) -> Result<()> {
        self.core.completion().await
    }

    pub fn to_array(&self) -> Vec<PriorityItem<T, i64>>
    where
        T: Clone,
    {
        self.core.to_array()
    }

    /// A `Stream` of successfully read items, ending once the channel is
    /// closed and drained. Backs [`pq_runner`]'s parallel reader driver
    /// (spec C10).
    pub fn read_stream(&self, cancel: CancelToken) -> ReadStream<T, i64, FixedStore<T>> {
        ReadStream::new(self.core.clone(), cancel)
    }
}

impl<T: Send + Sync + 'static> crate::PriorityChannel<T, i64> for FixedPriorityChannel<T> {
    fn try_write(&self, item: PriorityItem<T, i64>) -> bool {
        self.try_write(item)
    }

    fn try_read(&self) -> Option<PriorityItem<T, i64>> {
        self.try_read()
    }

    fn try_complete(&self, error: Option<pq_core::PriorityError>) -> bool {
        self.try_complete(error)
    }

    fn count(&self) -> usize {
        self.count()
    }

    fn read_stream(
        &self,
        cancel: CancelToken,
    ) -> std::pin::Pin<Box<dyn futures_core::Stream<Item = Result<PriorityItem<T, i64>>> + Send>> {
        Box::pin(self.read_stream(cancel))
    }
}
