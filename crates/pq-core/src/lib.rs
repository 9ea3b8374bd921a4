//! Shared error kinds and the `PriorityItem` value type for the priority
//! channel crates.

use std::fmt;
use std::result;

/// Crate-wide result alias.
pub type Result<T> = result::Result<T, PriorityError>;

/// Error kinds surfaced by the priority queue, segment, and channel layers.
///
/// Recoverable conditions (empty, full, closed, cancelled, not-present) are
/// returned as ordinary `Err` values rather than panics; only invariant
/// violations (e.g. an out-of-range fixed-priority level) panic at the call
/// site, per the crate's fail-fast policy for programmer errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PriorityError {
    /// A synchronous read/dequeue/peek found the container empty.
    #[error("queue is empty")]
    Empty,

    /// A bounded container is at capacity and cannot grow further.
    #[error("queue is full")]
    Full,

    /// The channel has been completed (no more writes, and reads are draining).
    #[error("channel is closed")]
    Closed,

    /// The operation was cancelled via its cancellation token.
    #[error("operation was cancelled")]
    Cancelled,

    /// `update_priority`/`remove` targeted a node no longer tracked by the queue.
    #[error("item is not present in the queue")]
    NotPresent,

    /// A priority value could not be accepted (currently: NaN).
    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    /// The error supplied to `try_complete`, propagated to parked readers and
    /// to the channel's completion future.
    #[error("channel completed with error: {0}")]
    User(std::sync::Arc<dyn std::error::Error + Send + Sync>),
}

impl PartialEq for PriorityError {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Empty, Self::Empty)
                | (Self::Full, Self::Full)
                | (Self::Closed, Self::Closed)
                | (Self::Cancelled, Self::Cancelled)
                | (Self::NotPresent, Self::NotPresent)
        ) || matches!((self, other), (Self::InvalidPriority(a), Self::InvalidPriority(b)) if a == b)
    }
}

/// An immutable `(priority, payload)` pair with structural equality.
///
/// `Priority` is `i64` for the fixed-K channel and `f64` (NaN rejected at
/// construction, see [`PriorityItem::new_checked`]) for the dynamic channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriorityItem<T, P = i64> {
    pub priority: P,
    pub item: T,
}

impl<T, P> PriorityItem<T, P> {
    pub fn new(priority: P, item: T) -> Self {
        Self { priority, item }
    }

    pub fn into_inner(self) -> (P, T) {
        (self.priority, self.item)
    }
}

impl<T> PriorityItem<T, f64> {
    /// Constructs a floating-point priority item, rejecting NaN priorities
    /// per the spec's "reject NaN with an invalid-argument failure" decision.
    pub fn new_checked(priority: f64, item: T) -> Result<Self> {
        if priority.is_nan() {
            return Err(PriorityError::InvalidPriority("priority is NaN".into()));
        }
        Ok(Self { priority, item })
    }
}

impl<T: fmt::Display, P: fmt::Display> fmt::Display for PriorityItem<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.priority, self.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_priority() {
        let err = PriorityItem::new_checked(f64::NAN, "x").unwrap_err();
        assert!(matches!(err, PriorityError::InvalidPriority(_)));
    }

    #[test]
    fn accepts_finite_priority() {
        let item = PriorityItem::new_checked(1.5, "x").unwrap();
        assert_eq!(item.priority, 1.5);
        assert_eq!(item.item, "x");
    }

    #[test]
    fn equality_is_structural() {
        let a = PriorityItem::new(0i64, "a");
        let b = PriorityItem::new(0i64, "a");
        let c = PriorityItem::new(1i64, "a");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
