//! Async operation (C4), waiter queue (C5), pause token (C6), and parallel
//! options (C7) — the coordination primitives shared by both channel shapes
//! and the parallel reader driver.

mod cancel;
mod op;
mod options;
mod pause;
mod waiters;

pub use cancel::{CancelSource, CancelToken};
pub use op::{AsyncOperation, OperationHandle, Pooled};
pub use options::ParallelOptions;
pub use pause::{PauseToken, PauseTokenSource};
pub use waiters::WaiterQueue;
