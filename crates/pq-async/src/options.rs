//! Mutable, observable max-degree-of-parallelism (spec component C7).

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::pause::PauseToken;

/// Options for [`pq_runner`]'s parallel reader driver: a resizable
/// concurrency cap, a pause token, and a cancellation token.
///
/// Changing [`ParallelOptions::set_max_degree_of_parallelism`] at runtime
/// emits a signed delta on an internal channel; the driver subscribes via
/// [`ParallelOptions::subscribe_deltas`] and applies the delta to its
/// semaphore (spec §4.7/§9 "observer registered by the driver").
pub struct ParallelOptions {
    max_degree_of_parallelism: Arc<AtomicI64>,
    deltas: mpsc::UnboundedSender<i64>,
    delta_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<i64>>>,
    pause_token: PauseToken,
    cancel_token: CancelToken,
}

impl ParallelOptions {
    pub fn new(pause_token: PauseToken, cancel_token: CancelToken) -> Self {
        Self::with_max_degree_of_parallelism(default_parallelism(), pause_token, cancel_token)
    }

    pub fn with_max_degree_of_parallelism(
        initial: usize,
        pause_token: PauseToken,
        cancel_token: CancelToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            max_degree_of_parallelism: Arc::new(AtomicI64::new(initial as i64)),
            deltas: tx,
            delta_rx: parking_lot::Mutex::new(Some(rx)),
            pause_token,
            cancel_token,
        }
    }

    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_degree_of_parallelism.load(Ordering::Acquire).max(0) as usize
    }

    /// Sets the new cap and emits the signed delta to any subscriber. Panics
    /// if `new_value` is zero — a channel with zero concurrency can never
    /// make progress, which is an invariant violation, not a recoverable
    /// condition.
    pub fn set_max_degree_of_parallelism(&self, new_value: usize) {
        assert!(new_value > 0, "max_degree_of_parallelism must be > 0");
        let previous = self
            .max_degree_of_parallelism
            .swap(new_value as i64, Ordering::AcqRel);
        let delta = new_value as i64 - previous;
        if delta != 0 {
            // The driver may have already dropped its receiver (e.g. it
            // finished); a failed send is not an error for the caller.
            let _ = self.deltas.send(delta);
        }
    }

    pub fn pause_token(&self) -> &PauseToken {
        &self.pause_token
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel_token
    }

    /// Takes the delta receiver; only the first caller (the driver) gets it.
    pub fn subscribe_deltas(&self) -> Option<mpsc::UnboundedReceiver<i64>> {
        self.delta_rx.lock().take()
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::pause::PauseTokenSource;

    #[test]
    fn default_is_processor_count() {
        let pause = PauseTokenSource::new();
        let cancel = CancelSource::new();
        let opts = ParallelOptions::new(pause.token(), cancel.token());
        assert_eq!(opts.max_degree_of_parallelism(), default_parallelism());
    }

    #[tokio::test]
    async fn set_emits_signed_delta() {
        let pause = PauseTokenSource::new();
        let cancel = CancelSource::new();
        let opts = ParallelOptions::with_max_degree_of_parallelism(2, pause.token(), cancel.token());
        let mut rx = opts.subscribe_deltas().unwrap();
        opts.set_max_degree_of_parallelism(4);
        assert_eq!(rx.recv().await, Some(2));
        opts.set_max_degree_of_parallelism(1);
        assert_eq!(rx.recv().await, Some(-3));
        assert_eq!(opts.max_degree_of_parallelism(), 1);
    }
}
