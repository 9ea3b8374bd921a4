//! Parallel reader driver (spec component C10): pulls items off a
//! [`pq_channel::PriorityChannel`] and runs a user body under a resizable
//! semaphore throttle, honoring a cooperative pause token (spec §4.7).

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use pq_async::{CancelToken, ParallelOptions};
use pq_channel::PriorityChannel;
use pq_core::{PriorityError, PriorityItem, Result};

/// Drives `chan` to completion, running `body` for each item under a
/// concurrency cap read from `options.max_degree_of_parallelism()`.
///
/// The cap can change at runtime: [`ParallelOptions::set_max_degree_of_parallelism`]
/// emits a signed delta that this driver applies to its semaphore — a
/// positive delta releases permits immediately, a negative delta spawns a
/// background task that acquires and holds permits until the cap is raised
/// again, shrinking effective concurrency without cancelling in-flight work
/// (spec §4.7, §9 "mutable shared options object").
///
/// Each item pulled off `chan`'s stream is checked against
/// `options.pause_token()` before a permit is acquired for it: if paused,
/// the item is handed back to `chan` (`try_write`) and the driver returns
/// immediately, without starting it or pulling anything further (spec §4.7
/// "the current item is handed back to the writer and iteration breaks").
/// A pause never cancels bodies already running; it only stops the driver
/// from starting new ones.
///
/// Returns once the stream ends (the channel closed and drained), a pause
/// hands an item back, or `options.cancel_token()` fires. Propagates the
/// first non-`Closed` error the stream yields; a `Closed` ending is the
/// normal termination path and is not surfaced as an error.
pub async fn run_parallel_reader<C, T, P, Fut, F>(
    chan: &C,
    options: Arc<ParallelOptions>,
    mut body: F,
) -> Result<()>
where
    C: PriorityChannel<T, P>,
    T: Send + 'static,
    P: Clone + Send + Sync + 'static,
    F: FnMut(PriorityItem<T, P>, CancelToken) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let cancel = options.cancel_token().clone();
    let mut stream = chan.read_stream(cancel.clone());

    let semaphore = Arc::new(Semaphore::new(options.max_degree_of_parallelism()));
    let mut resize_tasks = JoinSet::new();

    if let Some(mut rx) = options.subscribe_deltas() {
        let semaphore = semaphore.clone();
        resize_tasks.spawn(async move {
            while let Some(delta) = rx.recv().await {
                apply_delta(&semaphore, delta).await;
            }
        });
    }

    let mut in_flight: JoinSet<()> = JoinSet::new();

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("run_parallel_reader cancelled");
                break Ok(());
            }
            next = stream.next() => {
                match next {
                    None => break Ok(()),
                    Some(Err(PriorityError::Closed)) => break Ok(()),
                    Some(Err(err)) => break Err(err),
                    Some(Ok(item)) => {
                        if options.pause_token().is_paused() {
                            trace!("run_parallel_reader paused, handing item back and stopping");
                            chan.try_write(item);
                            break Ok(());
                        }
                        let permit = match semaphore.clone().acquire_owned().await {
                            Ok(p) => p,
                            Err(_) => break Ok(()),
                        };
                        let fut = body(item, cancel.clone());
                        in_flight.spawn(async move {
                            let _permit = permit;
                            fut.await;
                        });
                        // Bound unchecked growth of completed-but-unjoined tasks.
                        while in_flight.try_join_next().is_some() {}
                    }
                }
            }
        }
    };

    while in_flight.join_next().await.is_some() {}
    resize_tasks.abort_all();
    outcome
}

/// Applies one signed delta to `semaphore`: a positive delta releases
/// permits immediately; a negative delta acquires and forgets permits one at
/// a time, shrinking the effective cap without touching in-flight bodies
/// (spec §4.7 "asynchronously acquire permits").
async fn apply_delta(semaphore: &Arc<Semaphore>, delta: i64) {
    if delta > 0 {
        semaphore.add_permits(delta as usize);
        return;
    }
    for _ in 0..(-delta) {
        if let Ok(permit) = semaphore.acquire().await {
            permit.forget();
        }
    }
}
