//! A `futures_core::Stream` view over a channel's read path (spec §4.9
//! supplement), the concrete type backing [`pq_runner`]'s parallel reader
//! driver (C10), which "iterates the channel's async stream" per spec §4.7.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;

use pq_async::CancelToken;
use pq_core::{PriorityError, PriorityItem, Result};

use crate::core::ChannelCore;
use crate::store::Store;

type PendingRead<T, P> = Pin<Box<dyn Future<Output = Result<PriorityItem<T, P>>> + Send>>;

/// Yields `Ok(item)` for every successful read, then ends the stream (`None`)
/// once the channel is closed and drained. A read that fails for any other
/// reason (e.g. cancellation) is surfaced as `Some(Err(_))` rather than
/// silently ending the stream.
pub struct ReadStream<T, P, S> {
    core: Arc<ChannelCore<T, P, S>>,
    cancel: CancelToken,
    pending: Option<PendingRead<T, P>>,
}

impl<T, P, S> ReadStream<T, P, S>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    S: Store<T, P> + 'static,
{
    pub(crate) fn new(core: Arc<ChannelCore<T, P, S>>, cancel: CancelToken) -> Self {
        Self {
            core,
            cancel,
            pending: None,
        }
    }

    fn spawn_read(&self) -> PendingRead<T, P> {
        let core = self.core.clone();
        let cancel = self.cancel.clone();
        Box::pin(async move { core.read(cancel).await })
    }
}

impl<T, P, S> Stream for ReadStream<T, P, S>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    S: Store<T, P> + 'static,
{
    type Item = Result<PriorityItem<T, P>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.pending.is_none() {
            this.pending = Some(this.spawn_read());
        }
        let poll = this.pending.as_mut().expect("just armed above").as_mut().poll(cx);
        match poll {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.pending = None;
                match result {
                    Err(PriorityError::Closed) => Poll::Ready(None),
                    other => Poll::Ready(Some(other)),
                }
            }
        }
    }
}
