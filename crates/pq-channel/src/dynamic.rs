//! Dynamic floating-point-priority channel (spec component C9).

use std::sync::Arc;

use pq_async::CancelToken;
use pq_core::{PriorityError, PriorityItem, Result};

use crate::core::ChannelCore;
use crate::stream::ReadStream;
use crate::store::DynamicStore;

/// A priority-aware MPMC channel ordered by an arbitrary `f64` priority
/// (lower first), backed by a single [`pq_heap::ConcurrentPriorityQueue`]
/// instead of per-level queues — the C9 counterpart to
/// [`crate::FixedPriorityChannel`]. NaN priorities are rejected at the call
/// site (`SPEC_FULL.md` §9 Open Question: "treat the spec as float
/// uniformly and reject NaN").
pub struct DynamicPriorityChannel<T> {
    core: Arc<ChannelCore<T, f64, DynamicStore<T>>>,
}

impl<T> Clone for DynamicPriorityChannel<T> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone() }
    }
}

impl<T: Send + Sync + 'static> DynamicPriorityChannel<T> {
    pub fn new() -> Self {
        Self {
            core: Arc::new(ChannelCore::new(DynamicStore::new())),
        }
    }

    pub fn try_write(&self, item: PriorityItem<T, f64>) -> bool {
        if item.priority.is_nan() {
            return false;
        }
        let (priority, payload) = item.into_inner();
        self.core.try_write(priority, payload)
    }

    pub async fn write(&self, item: PriorityItem<T, f64>, cancel: CancelToken) -> Result<()> {
        if item.priority.is_nan() {
            return Err(PriorityError::InvalidPriority("priority is NaN".into()));
        }
        let (priority, payload) = item.into_inner();
        self.core.write(priority, payload, cancel).await
    }

    pub async fn wait_to_write(&self, cancel: CancelToken) -> Result<bool> {
        self.core.wait_to_write(cancel).await
    }

    pub fn try_complete(&self, error: Option<PriorityError>) -> bool {
        self.core.try_complete(error)
    }

    pub fn try_read(&self) -> Option<PriorityItem<T, f64>> {
        self.core.try_read()
    }

    pub async fn read(&self, cancel: CancelToken) -> Result<PriorityItem<T, f64>> {
        self.core.read(cancel).await
    }

    pub async fn wait_to_read(&self, cancel: CancelToken) -> Result<bool> {
        self.core.wait_to_read(cancel).await
    }

    pub fn try_peek(&self) -> Option<PriorityItem<T, f64>>
    where
        T: Clone,
    {
        self.core.try_peek()
    }

    pub fn try_remove(&self, item: PriorityItem<T, f64>) -> bool
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

    pub fn to_array(&self) -> Vec<PriorityItem<T, f64>>
    where
        T: Clone,
    {
        self.core.to_array()
    }

    pub fn read_stream(&self, cancel: CancelToken) -> ReadStream<T, f64, DynamicStore<T>> {
        ReadStream::new(self.core.clone(), cancel)
    }
}

impl<T: Send + Sync + 'static> crate::PriorityChannel<T, f64> for DynamicPriorityChannel<T> {
    fn try_write(&self, item: PriorityItem<T, f64>) -> bool {
        self.try_write(item)
    }

    fn try_read(&self) -> Option<PriorityItem<T, f64>> {
        self.try_read()
    }

    fn try_complete(&self, error: Option<PriorityError>) -> bool {
        self.try_complete(error)
    }

    fn count(&self) -> usize {
        self.count()
    }

    fn read_stream(
        &self,
        cancel: CancelToken,
    ) -> std::pin::Pin<Box<dyn futures_core::Stream<Item = Result<PriorityItem<T, f64>>> + Send>> {
        Box::pin(self.read_stream(cancel))
    }
}

impl<T: Send + Sync + 'static> Default for DynamicPriorityChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}
