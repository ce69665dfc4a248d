//! RAII slot pairing a spawned handler with the in-flight counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// One running handler. Increments the counter on acquire; on drop
/// (normal completion, panic unwind, or task abort) cancels the per-task
/// token and decrements the counter.
pub(super) struct InFlight {
    running: Arc<AtomicUsize>,
    token: CancellationToken,
    count: usize,
}

impl InFlight {
    pub(super) fn acquire(running: Arc<AtomicUsize>, token: CancellationToken) -> Self {
        let previous = running.fetch_add(1, Ordering::AcqRel);
        Self {
            running,
            token,
            count: previous.saturating_add(1),
        }
    }

    pub(super) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Counter value right after this slot was acquired.
    pub(super) fn count(&self) -> usize {
        self.count
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.token.cancel();
        self.running.fetch_sub(1, Ordering::AcqRel);
    }
}
