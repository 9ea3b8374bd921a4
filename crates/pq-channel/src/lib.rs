//! Priority-aware asynchronous channels: a fixed K-level integer-priority
//! shape (C8) and a dynamic floating-point-priority shape (C9), sharing one
//! rendezvous engine over a pluggable backing [`store::Store`].

use std::pin::Pin;

use futures_core::Stream;

use pq_async::CancelToken;
use pq_core::{PriorityError, PriorityItem, Result};

mod core;
mod dynamic;
mod fixed;
mod stream;
mod store;

pub use dynamic::DynamicPriorityChannel;
pub use fixed::FixedPriorityChannel;
pub use stream::ReadStream;

/// The reader/writer capability contract [`FixedPriorityChannel`] and
/// [`DynamicPriorityChannel`] both satisfy, over their respective priority
/// types (`i64` levels vs. `f64` ordering) — the "two small capability
/// contracts composed by the concrete channel" shape `SPEC_FULL.md` §9
/// describes, exposed one layer up so callers generic over "some priority
/// channel" (e.g. [`pq_runner::run_parallel_reader`]) don't need to pick a
/// concrete shape.
pub trait PriorityChannel<T, P>: Send + Sync
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn try_write(&self, item: PriorityItem<T, P>) -> bool;
    fn try_read(&self) -> Option<PriorityItem<T, P>>;
    fn try_complete(&self, error: Option<PriorityError>) -> bool;
    fn count(&self) -> usize;
    fn read_stream(
        &self,
        cancel: CancelToken,
    ) -> Pin<Box<dyn Stream<Item = Result<PriorityItem<T, P>>> + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_async::{CancelSource, CancelToken};
    use pq_core::{PriorityError, PriorityItem};
    use std::time::Duration;

    // Scenario 1 (spec §8): fixed K=3 drains in (priority, insertion) order.
    #[test]
    fn fixed_k3_drains_in_priority_then_insertion_order() {
        let chan = FixedPriorityChannel::<&str>::new(3);
        assert!(chan.try_write(PriorityItem::new(2, "a")));
        assert!(chan.try_write(PriorityItem::new(0, "b")));
        assert!(chan.try_write(PriorityItem::new(1, "c")));
        assert!(chan.try_write(PriorityItem::new(0, "d")));

        let drained: Vec<&str> = std::iter::from_fn(|| chan.try_read().map(|i| i.item)).collect();
        assert_eq!(drained, vec!["b", "d", "c", "a"]);
        assert_eq!(chan.count(), 0);
    }

    // Scenario 2 (spec §8): dynamic channel drains by (priority, insertion).
    #[test]
    fn dynamic_drains_in_priority_then_insertion_order() {
        let chan = DynamicPriorityChannel::<&str>::new();
        assert!(chan.try_write(PriorityItem::new(1.5, "x")));
        assert!(chan.try_write(PriorityItem::new(1.5, "y")));
        assert!(chan.try_write(PriorityItem::new(0.5, "z")));

        let drained: Vec<&str> = std::iter::from_fn(|| chan.try_read().map(|i| i.item)).collect();
        assert_eq!(drained, vec!["z", "x", "y"]);
    }

    // Scenario 3: a parked reader rendezvouses directly with a writer.
    #[tokio::test]
    async fn parked_reader_rendezvouses_with_writer() {
        let chan = FixedPriorityChannel::<&str>::new(3);
        let reader = {
            let chan = chan.clone();
            tokio::spawn(async move { chan.read(CancelToken::none()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(chan.try_write(PriorityItem::new(0, "p")));
        let item = reader.await.unwrap().unwrap();
        assert_eq!(item.item, "p");
        assert_eq!(chan.count(), 0);
    }

    // Scenario 4: completion drains remaining items, then reads fail closed,
    // and the completion future resolves once the channel is empty.
    #[tokio::test]
    async fn completion_drains_then_closes() {
        let chan = FixedPriorityChannel::<&str>::new(1);
        assert!(chan.try_write(PriorityItem::new(0, "a")));
        assert!(chan.try_write(PriorityItem::new(0, "b")));
        assert!(chan.try_complete(None));
        assert!(!chan.try_complete(None), "try_complete must be idempotent-false");

        assert_eq!(chan.read(CancelToken::none()).await.unwrap().item, "a");
        assert_eq!(chan.read(CancelToken::none()).await.unwrap().item, "b");
        assert!(matches!(
            chan.read(CancelToken::none()).await,
            Err(PriorityError::Closed)
        ));
        chan.completion().await.unwrap();
    }

    // Scenario 5: cancelling a parked reader frees it; the item it would
    // have received instead lands in the store for the next reader.
    #[tokio::test]
    async fn cancelled_reader_does_not_consume_later_write() {
        let chan = FixedPriorityChannel::<&str>::new(1);
        let cancel_source = CancelSource::new();
        let reader = {
            let chan = chan.clone();
            let cancel = cancel_source.token();
            tokio::spawn(async move { chan.read(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel_source.cancel();
        assert!(matches!(reader.await.unwrap(), Err(PriorityError::Cancelled)));

        assert!(chan.try_write(PriorityItem::new(0, "later")));
        assert_eq!(chan.count(), 1, "the bounced delivery attempt must not leak a count");
        assert_eq!(chan.try_read().unwrap().item, "later");
    }

    #[test]
    fn try_remove_prevents_a_later_read_of_that_item() {
        let chan = FixedPriorityChannel::<&str>::new(1);
        chan.try_write(PriorityItem::new(0, "x"));
        assert!(chan.try_remove(PriorityItem::new(0, "x")));
        assert!(!chan.try_remove(PriorityItem::new(0, "x")));
        assert_eq!(chan.try_read(), None);
        assert_eq!(chan.count(), 0);
    }

    #[test]
    fn to_array_is_a_non_consuming_snapshot() {
        let chan = FixedPriorityChannel::<&str>::new(2);
        chan.try_write(PriorityItem::new(1, "a"));
        chan.try_write(PriorityItem::new(0, "b"));
        let snap = chan.to_array();
        assert_eq!(snap.len(), chan.count());
        assert_eq!(chan.count(), 2, "to_array must not consume items");
    }

    #[test]
    fn dynamic_rejects_nan_priority() {
        let chan = DynamicPriorityChannel::<&str>::new();
        assert!(!chan.try_write(PriorityItem::new(f64::NAN, "x")));
    }

    #[tokio::test]
    async fn wait_to_read_resolves_false_once_closed_and_drained() {
        let chan = FixedPriorityChannel::<&str>::new(1);
        chan.try_complete(None);
        assert_eq!(chan.wait_to_read(CancelToken::none()).await.unwrap(), false);
    }

    #[tokio::test]
    async fn wait_to_read_wakes_on_write_when_previously_empty() {
        let chan = FixedPriorityChannel::<&str>::new(1);
        let waiter = {
            let chan = chan.clone();
            tokio::spawn(async move { chan.wait_to_read(CancelToken::none()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        chan.try_write(PriorityItem::new(0, "a"));
        assert_eq!(waiter.await.unwrap().unwrap(), true);
    }

    #[test]
    fn randomized_fixed_round_trip_matches_stable_sort() {
        let levels = 5usize;
        let chan = FixedPriorityChannel::<u64>::new(levels);
        let mut inputs = Vec::new();
        for i in 0..400u64 {
            let p = fastrand::i64(0..levels as i64);
            inputs.push((p, i));
            assert!(chan.try_write(PriorityItem::new(p, i)));
        }
        let mut expected = inputs.clone();
        expected.sort_by_key(|&(p, i)| (p, i));

        let mut actual = Vec::new();
        while let Some(item) = chan.try_read() {
            actual.push((item.priority, item.item));
        }
        assert_eq!(actual, expected);
    }
}
