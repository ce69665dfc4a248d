//! The dispatch capability shared by the poller, router and conversations.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::Update;

/// Handles one update. Fire-and-forget: the poller never looks at the outcome.
///
/// `cancel` is derived from the poller's root token and fires when the poller
/// is torn down; long-running handlers should select on it.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process a single update.
    async fn handle_update(&self, cancel: CancellationToken, update: &Update);
}

/// Wrap an async closure as a shareable [`Handler`].
///
/// The closure receives its own clone of the update.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(CancellationToken, Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(CancellationToken, Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle_update(&self, cancel: CancellationToken, update: &Update) {
        (self.0)(cancel, update.clone()).await;
    }
}
