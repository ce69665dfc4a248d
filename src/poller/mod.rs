//! Long-polling update loop with concurrent dispatch and graceful shutdown.
//!
//! [`LongPoller::listen`] repeatedly calls the [`Fetcher`], advances the
//! cursor past every new update and spawns one tokio task per update.
//! Tasks run unordered and unbounded; the only shared state is the
//! in-flight counter and the root cancellation token.
//!
//! [`LongPoller::shutdown`] stops fetching, waits for in-flight handlers
//! until a deadline, then cancels.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fetcher::{FetchError, Fetcher, PollRequest};
use crate::handler::Handler;
use crate::types::Update;

mod in_flight;

use in_flight::InFlight;

/// Initial sleep after a failed fetch.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Upper bound for the doubling retry backoff.
pub const DEFAULT_MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// How often `shutdown` re-checks the in-flight counter.
pub const DEFAULT_SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Called synchronously on the fetch loop for every failed fetch.
/// Must not block.
pub type ErrorCallback = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Tuning knobs for [`LongPoller`].
#[derive(Clone)]
pub struct PollerOptions {
    error_callback: ErrorCallback,
    retry_backoff: Duration,
    max_retry_backoff: Duration,
    shutdown_poll_interval: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            error_callback: Arc::new(|err: &FetchError| {
                warn!(error = %err, "listen updates failed");
            }),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_retry_backoff: DEFAULT_MAX_RETRY_BACKOFF,
            shutdown_poll_interval: DEFAULT_SHUTDOWN_POLL_INTERVAL,
        }
    }
}

impl fmt::Debug for PollerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerOptions")
            .field("retry_backoff", &self.retry_backoff)
            .field("max_retry_backoff", &self.max_retry_backoff)
            .field("shutdown_poll_interval", &self.shutdown_poll_interval)
            .finish_non_exhaustive()
    }
}

impl PollerOptions {
    /// Replace the default logging error callback.
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&FetchError) + Send + Sync + 'static,
    {
        self.error_callback = Arc::new(callback);
        self
    }

    /// Sleep after the first failed fetch. Raises the cap if it is lower.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self.max_retry_backoff = self.max_retry_backoff.max(backoff);
        self
    }

    /// Cap for the doubling backoff. Equal to the initial backoff means a
    /// fixed retry interval.
    pub fn with_max_retry_backoff(mut self, max: Duration) -> Self {
        self.max_retry_backoff = max.max(self.retry_backoff);
        self
    }

    /// Interval at which `shutdown` polls the in-flight counter.
    pub fn with_shutdown_poll_interval(mut self, interval: Duration) -> Self {
        self.shutdown_poll_interval = interval;
        self
    }

    /// Initial retry backoff.
    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Backoff cap.
    pub fn max_retry_backoff(&self) -> Duration {
        self.max_retry_backoff
    }
}

/// Lifecycle of a [`LongPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Fetching and dispatching.
    Running,
    /// Stop signalled; waiting for in-flight handlers.
    ShuttingDown,
    /// Root token cancelled.
    Stopped,
}

/// Returned by [`LongPoller::shutdown`] when handlers outlive the deadline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    /// Handlers were still running when the deadline passed.
    #[error("shutdown deadline exceeded with {remaining} handler(s) still running")]
    DeadlineExceeded {
        /// In-flight handlers at the moment the deadline passed.
        remaining: usize,
    },
}

/// Single-cursor long poller.
pub struct LongPoller {
    fetcher: Arc<dyn Fetcher>,
    handler: Arc<dyn Handler>,
    options: PollerOptions,
    /// Parent of every per-task token.
    root: CancellationToken,
    /// Graceful stop: prevents further fetches.
    stop: CancellationToken,
    running: Arc<AtomicUsize>,
}

impl LongPoller {
    /// Create a poller in the `Running` state.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        handler: Arc<dyn Handler>,
        options: PollerOptions,
    ) -> Self {
        Self {
            fetcher,
            handler,
            options,
            root: CancellationToken::new(),
            stop: CancellationToken::new(),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Poll until stop or root cancellation is observed.
    ///
    /// `request.offset` is the cursor; it is advanced in place and never
    /// decreases. Fetch errors go to the error callback and are retried
    /// after a backoff sleep. A fetch already in progress is not aborted
    /// by shutdown; the loop exits once it returns.
    pub async fn listen(&self, request: &mut PollRequest) {
        info!(offset = request.offset, "long poller listening");
        let mut backoff = self.options.retry_backoff;

        loop {
            if self.stop.is_cancelled() || self.root.is_cancelled() {
                break;
            }

            match self.fetcher.get_updates(request).await {
                Ok(updates) => {
                    backoff = self.options.retry_backoff;
                    self.dispatch(request, updates);
                }
                Err(err) => {
                    (self.options.error_callback)(&err);
                    debug!(backoff_ms = backoff.as_millis(), "retrying after fetch error");
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = self.stop.cancelled() => {}
                        () = self.root.cancelled() => {}
                    }
                    backoff = backoff
                        .saturating_mul(2)
                        .min(self.options.max_retry_backoff);
                }
            }
        }

        info!(offset = request.offset, "long poller stopped listening");
    }

    /// Advance the cursor over a fetched batch and spawn a task per new update.
    fn dispatch(&self, request: &mut PollRequest, updates: Vec<Update>) {
        for update in updates {
            if update.id < request.offset {
                debug!(
                    update_id = update.id,
                    offset = request.offset,
                    "skipping redelivered update"
                );
                continue;
            }
            request.offset = update.id.saturating_add(1);
            self.spawn(update);
        }
    }

    fn spawn(&self, update: Update) {
        let slot = InFlight::acquire(Arc::clone(&self.running), self.root.child_token());
        let handler = Arc::clone(&self.handler);
        debug!(update_id = update.id, in_flight = slot.count(), "dispatching update");
        tokio::spawn(async move {
            handler.handle_update(slot.token(), &update).await;
            drop(slot);
        });
    }

    /// Stop fetching, wait for in-flight handlers, then cancel the root token.
    ///
    /// Returns as soon as the in-flight counter reads zero. If handlers are
    /// still running after `deadline`, returns
    /// [`ShutdownError::DeadlineExceeded`]. The root token is cancelled in
    /// both cases, which every handler token observes.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownError> {
        self.stop.cancel();
        info!(
            in_flight = self.in_flight(),
            deadline_ms = deadline.as_millis(),
            "long poller shutting down"
        );

        let result = self.wait_idle(deadline).await;
        self.root.cancel();

        match &result {
            Ok(()) => info!("long poller shut down cleanly"),
            Err(err) => warn!(error = %err, "abandoning in-flight handlers"),
        }
        result
    }

    async fn wait_idle(&self, deadline: Duration) -> Result<(), ShutdownError> {
        let expires = Instant::now().checked_add(deadline);
        loop {
            let pending = self.in_flight();
            if pending == 0 {
                return Ok(());
            }
            let now = Instant::now();
            if expires.is_some_and(|at| now >= at) {
                return Err(ShutdownError::DeadlineExceeded { remaining: pending });
            }
            // Never sleep past the deadline, however long the poll interval.
            let next_poll = now.checked_add(self.options.shutdown_poll_interval);
            match next_poll.into_iter().chain(expires).min() {
                Some(wake) => tokio::time::sleep_until(wake).await,
                None => tokio::time::sleep(self.options.shutdown_poll_interval).await,
            }
        }
    }

    /// Handlers currently executing.
    pub fn in_flight(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        if self.root.is_cancelled() {
            PollerState::Stopped
        } else if self.stop.is_cancelled() {
            PollerState::ShuttingDown
        } else {
            PollerState::Running
        }
    }

    /// Clone of the root token. Cancelling it stops the loop and signals
    /// every running handler without waiting.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }
}
