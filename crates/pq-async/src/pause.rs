//! Cooperative pause token (spec component C6).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner {
    /// Present iff paused; cleared and notified on resume.
    current: Mutex<Option<Arc<Notify>>>,
    parent: Option<PauseToken>,
}

/// A cooperative "please pause" signal a worker can poll or await.
#[derive(Clone)]
pub struct PauseToken {
    inner: Arc<Inner>,
}

impl PauseToken {
    pub fn is_paused(&self) -> bool {
        self.inner.current.lock().is_some()
            || self.inner.parent.as_ref().is_some_and(PauseToken::is_paused)
    }

    /// Resolves once neither this token nor its parent chain is paused.
    pub async fn wait_while_paused(&self) {
        loop {
            let notify = self.inner.current.lock().clone();
            if let Some(notify) = notify {
                notify.notified().await;
            } else if let Some(parent) = &self.inner.parent {
                if parent.is_paused() {
                    Box::pin(parent.wait_while_paused()).await;
                    continue;
                } else {
                    return;
                }
            } else {
                return;
            }
            // Re-check: another pause may have been installed between our
            // notify firing and this point.
            if !self.is_paused() {
                return;
            }
        }
    }

    /// Chains `self` under `parent`: paused iff either is paused.
    pub fn with_parent(self, parent: PauseToken) -> Self {
        PauseToken {
            inner: Arc::new(Inner {
                current: Mutex::new(self.inner.current.lock().clone()),
                parent: Some(parent),
            }),
        }
    }
}

/// The writable half of a [`PauseToken`].
pub struct PauseTokenSource {
    inner: Arc<Inner>,
}

impl PauseTokenSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                current: Mutex::new(None),
                parent: None,
            }),
        }
    }

    pub fn token(&self) -> PauseToken {
        PauseToken {
            inner: self.inner.clone(),
        }
    }

    /// No-op if already paused.
    pub fn pause(&self) {
        let mut current = self.inner.current.lock();
        if current.is_none() {
            *current = Some(Arc::new(Notify::new()));
        }
    }

    /// No-op if not paused.
    pub fn resume(&self) {
        let notify = self.inner.current.lock().take();
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.current.lock().is_some()
    }
}

impl Default for PauseTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pause_then_resume_releases_waiter() {
        let source = PauseTokenSource::new();
        let token = source.token();
        source.pause();
        assert!(token.is_paused());
        let waiter = tokio::spawn({
            let token = token.clone();
            async move {
                token.wait_while_paused().await;
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        source.resume();
        waiter.await.unwrap();
        assert!(!token.is_paused());
    }

    #[tokio::test]
    async fn not_paused_resolves_immediately() {
        let source = PauseTokenSource::new();
        let token = source.token();
        token.wait_while_paused().await;
    }

    #[tokio::test]
    async fn double_pause_is_idempotent() {
        let source = PauseTokenSource::new();
        source.pause();
        source.pause();
        source.resume();
        assert!(!source.is_paused());
    }

    #[test]
    fn child_paused_when_parent_paused() {
        let parent_source = PauseTokenSource::new();
        let parent = parent_source.token();
        let child_source = PauseTokenSource::new();
        let child = child_source.token().with_parent(parent.clone());
        assert!(!child.is_paused());
        parent_source.pause();
        assert!(child.is_paused());
    }
}
