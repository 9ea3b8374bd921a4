//! A minimal cooperative cancellation token, the "cancel" half of every
//! suspending operation's signature in spec §5 ("Cancellation").

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    /// True only for [`CancelToken::none`]'s sentinel. Lets a channel's read
    /// path pick the pooled, non-cancellable reader fast path (spec §4.5 "park
    /// a pooled singleton reader if the caller cannot cancel") without every
    /// call site threading a separate `bool` alongside the token.
    is_none: bool,
}

/// A cheaply cloneable, cooperative cancellation signal.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// False for [`CancelToken::none`]; true for any token obtained from a
    /// real [`CancelSource`].
    pub fn can_cancel(&self) -> bool {
        !self.inner.is_none
    }

    /// Resolves immediately if already cancelled, otherwise waits for
    /// [`CancelSource::cancel`].
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// A token that can never be cancelled, for call sites that do not need
    /// cancellation support.
    pub fn none() -> Self {
        CancelToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                is_none: true,
            }),
        }
    }
}

/// The writable half of a [`CancelToken`].
#[derive(Clone)]
pub struct CancelSource {
    inner: Arc<Inner>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                is_none: false,
            }),
        }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.clone(),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let source = CancelSource::new();
        let token = source.token();
        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        source.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let source = CancelSource::new();
        source.cancel();
        let token = source.token();
        token.cancelled().await;
    }

    #[test]
    fn none_cannot_cancel_but_real_token_can() {
        assert!(!CancelToken::none().can_cancel());
        assert!(CancelSource::new().token().can_cancel());
    }
}
