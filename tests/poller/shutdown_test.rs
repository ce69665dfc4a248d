//! Graceful shutdown: waiting on in-flight handlers and deadline handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use botpoll::fetcher::PollRequest;
use botpoll::handler::Handler;
use botpoll::poller::{LongPoller, PollerOptions, PollerState, ShutdownError};
use botpoll::types::Update;

use crate::support::{update, wait_until, RecordingHandler, ScriptedFetcher};

/// Holds each handler until a permit is released or its token is cancelled.
struct GatedHandler {
    gate: Semaphore,
    started: AtomicUsize,
    released: AtomicUsize,
    cancelled: AtomicUsize,
}

impl GatedHandler {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Handler for GatedHandler {
    async fn handle_update(&self, cancel: CancellationToken, _update: &Update) {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            permit = self.gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                self.released.fetch_add(1, Ordering::SeqCst);
            }
            () = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

async fn poller_with_held_tasks(count: i64) -> (Arc<LongPoller>, Arc<GatedHandler>) {
    let options = PollerOptions::default().with_shutdown_poll_interval(Duration::from_millis(1));
    held_tasks_with_options(count, options).await
}

async fn held_tasks_with_options(
    count: i64,
    options: PollerOptions,
) -> (Arc<LongPoller>, Arc<GatedHandler>) {
    let batch = (1..=count).map(update).collect();
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(batch)]));
    let handler = Arc::new(GatedHandler::new());
    let poller = Arc::new(LongPoller::new(fetcher, handler.clone(), options));

    let listening = Arc::clone(&poller);
    tokio::spawn(async move {
        let mut request = PollRequest::default();
        listening.listen(&mut request).await;
    });

    let expected = usize::try_from(count).expect("small count");
    wait_until(|| handler.started.load(Ordering::SeqCst) == expected).await;
    assert_eq!(poller.in_flight(), expected);
    (poller, handler)
}

#[tokio::test]
async fn idle_poller_shuts_down_immediately() {
    let poller = LongPoller::new(
        Arc::new(ScriptedFetcher::default()),
        Arc::new(RecordingHandler::default()),
        PollerOptions::default(),
    );
    assert_eq!(poller.state(), PollerState::Running);

    let started = tokio::time::Instant::now();
    assert_eq!(poller.shutdown(Duration::from_secs(30)).await, Ok(()));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(poller.state(), PollerState::Stopped);
    assert!(poller.cancellation_token().is_cancelled());
}

#[tokio::test]
async fn shutdown_waits_for_held_tasks() {
    let (poller, handler) = poller_with_held_tasks(3).await;

    let stopping = Arc::clone(&poller);
    let shutdown = tokio::spawn(async move { stopping.shutdown(Duration::from_secs(5)).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!shutdown.is_finished(), "shutdown returned with tasks in flight");
    assert_eq!(poller.state(), PollerState::ShuttingDown);

    handler.gate.add_permits(3);
    let result = shutdown.await.expect("shutdown task");

    assert_eq!(result, Ok(()));
    assert_eq!(handler.released.load(Ordering::SeqCst), 3);
    assert_eq!(handler.cancelled.load(Ordering::SeqCst), 0);
    assert_eq!(poller.in_flight(), 0);
    assert_eq!(poller.state(), PollerState::Stopped);
}

#[tokio::test]
async fn shutdown_reports_deadline_exceeded_then_cancels_handlers() {
    let (poller, handler) = poller_with_held_tasks(2).await;

    let result = poller.shutdown(Duration::from_millis(20)).await;
    assert_eq!(result, Err(ShutdownError::DeadlineExceeded { remaining: 2 }));

    // Root cancellation reaches the per-task tokens.
    wait_until(|| poller.in_flight() == 0).await;
    assert_eq!(handler.cancelled.load(Ordering::SeqCst), 2);
    assert_eq!(handler.released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deadline_wins_over_long_poll_interval() {
    let options = PollerOptions::default().with_shutdown_poll_interval(Duration::from_secs(30));
    let (poller, handler) = held_tasks_with_options(1, options).await;

    let started = tokio::time::Instant::now();
    let result = poller.shutdown(Duration::from_millis(20)).await;
    let elapsed = started.elapsed();

    assert_eq!(result, Err(ShutdownError::DeadlineExceeded { remaining: 1 }));
    assert!(elapsed < Duration::from_secs(2), "shutdown took {elapsed:?}");
    wait_until(|| handler.cancelled.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn stop_blocks_new_fetches_but_not_running_handlers() {
    let (poller, handler) = poller_with_held_tasks(1).await;

    let stopping = Arc::clone(&poller);
    let shutdown = tokio::spawn(async move { stopping.shutdown(Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Still running, not cancelled, until released.
    assert_eq!(handler.cancelled.load(Ordering::SeqCst), 0);
    assert_eq!(poller.in_flight(), 1);

    handler.gate.add_permits(1);
    assert_eq!(shutdown.await.expect("shutdown task"), Ok(()));
    assert_eq!(handler.released.load(Ordering::SeqCst), 1);
}

#[test]
fn deadline_error_names_remaining_handlers() {
    let err = ShutdownError::DeadlineExceeded { remaining: 4 };
    assert_eq!(
        err.to_string(),
        "shutdown deadline exceeded with 4 handler(s) still running"
    );
}
