//! Priority tree traversal.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use botpoll::handler::{handler_fn, Handler};
use botpoll::router::{Filter, Router, ROOT_ROUTE};

use crate::support::{callback_update, text_update, CountingHandler, USER_ID};

fn counter() -> (Arc<CountingHandler>, Arc<dyn Handler>) {
    let handler = Arc::new(CountingHandler::default());
    let dyn_handler: Arc<dyn Handler> = handler.clone();
    (handler, dyn_handler)
}

#[tokio::test]
async fn first_accepting_sibling_wins() {
    let (n2, n2_handler) = counter();
    let (n3, n3_handler) = counter();
    let router = Router::builder()
        .branch("n1", Filter::Any, |b| {
            b.route("n2", Filter::text_prefix("a"), n2_handler)
                .route("n3", Filter::Message, n3_handler)
        })
        .build();

    let update = text_update(1, USER_ID, "abc");
    let route = router.resolve(&update).expect("n2 should match");
    assert_eq!(route.name(), "n2");

    router
        .handle_update(CancellationToken::new(), &update)
        .await;
    assert_eq!(n2.hits(), 1);
    assert_eq!(n3.hits(), 0);
}

#[tokio::test]
async fn later_sibling_runs_when_earlier_rejects() {
    let (n2, n2_handler) = counter();
    let (n3, n3_handler) = counter();
    let router = Router::builder()
        .route("n2", Filter::text_prefix("a"), n2_handler)
        .route("n3", Filter::Message, n3_handler)
        .build();

    router
        .handle_update(CancellationToken::new(), &text_update(1, USER_ID, "zzz"))
        .await;
    assert_eq!(n2.hits(), 0);
    assert_eq!(n3.hits(), 1);
}

#[tokio::test]
async fn rejecting_branch_hides_its_children() {
    let (inner, inner_handler) = counter();
    let (fallback, fallback_handler) = counter();
    let router = Router::builder()
        .fallback(fallback_handler)
        .branch("callbacks", Filter::CallbackQuery, |b| {
            b.route("anything", Filter::Any, inner_handler)
        })
        .build();

    let update = text_update(1, USER_ID, "hello");
    assert_eq!(router.resolve(&update).map(|r| r.name()), Some(ROOT_ROUTE));

    router.handle_update(CancellationToken::new(), &update).await;
    assert_eq!(inner.hits(), 0);
    assert_eq!(fallback.hits(), 1);
}

#[tokio::test]
async fn empty_interior_node_falls_through_to_next_sibling() {
    let (next, next_handler) = counter();
    let router = Router::builder()
        .branch("commands", Filter::Message, |b| {
            b.route("start", Filter::command("start"), Arc::new(CountingHandler::default()))
        })
        .route("next", Filter::Any, next_handler)
        .build();

    let update = text_update(1, USER_ID, "not a command");
    assert_eq!(router.resolve(&update).map(|r| r.name()), Some("next"));
    router.handle_update(CancellationToken::new(), &update).await;
    assert_eq!(next.hits(), 1);
}

#[tokio::test]
async fn branch_fallback_catches_unmatched_children() {
    let (start, start_handler) = counter();
    let (other, other_handler) = counter();
    let (root, root_handler) = counter();
    let router = Router::builder()
        .fallback(root_handler)
        .branch("messages", Filter::Message, |b| {
            b.fallback(other_handler)
                .route("start", Filter::command("start"), start_handler)
        })
        .build();

    let token = CancellationToken::new();
    router
        .handle_update(token.clone(), &text_update(1, USER_ID, "/start"))
        .await;
    router
        .handle_update(token.clone(), &text_update(2, USER_ID, "plain"))
        .await;
    router
        .handle_update(token, &callback_update(3, "x"))
        .await;

    assert_eq!(start.hits(), 1);
    assert_eq!(other.hits(), 1);
    assert_eq!(root.hits(), 1);
}

#[tokio::test]
async fn no_handler_fires_when_nothing_accepts() {
    let (only, only_handler) = counter();
    let router = Router::builder()
        .route("callbacks", Filter::CallbackQuery, only_handler)
        .build();

    let update = text_update(1, USER_ID, "hi");
    assert!(router.resolve(&update).is_none());
    router.handle_update(CancellationToken::new(), &update).await;
    assert_eq!(only.hits(), 0);
}

#[tokio::test]
async fn handler_fn_receives_update_and_token() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |cancel, update| {
        let sink = Arc::clone(&sink);
        async move {
            let text = update.message().map(|m| m.text().to_owned());
            sink.lock()
                .expect("sink lock")
                .push((update.id, text, cancel.is_cancelled()));
        }
    });
    let router = Router::builder().fallback(handler).build();

    router
        .handle_update(CancellationToken::new(), &text_update(7, USER_ID, "ping"))
        .await;

    let seen = seen.lock().expect("sink lock").clone();
    assert_eq!(seen, vec![(7, Some("ping".to_owned()), false)]);
}

#[test]
fn route_names_follow_traversal_order() {
    let noop = || -> Arc<dyn Handler> { Arc::new(CountingHandler::default()) };
    let router = Router::builder()
        .route("a", Filter::Any, noop())
        .branch("b", Filter::Message, |b| {
            b.route("b1", Filter::Any, noop()).route("b2", Filter::Any, noop())
        })
        .route("c", Filter::Any, noop())
        .build();

    assert_eq!(router.route_names(), vec![ROOT_ROUTE, "a", "b", "b1", "b2", "c"]);
}
