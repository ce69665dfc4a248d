//! Fixtures shared by the integration test binaries.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use botpoll::fetcher::{FetchError, Fetcher, PollRequest};
use botpoll::handler::Handler;
use botpoll::types::{CallbackQuery, Chat, Message, MessageEntity, Update, UpdateKind, User};

pub const USER_ID: i64 = 415_494_855;

pub fn user(id: i64) -> User {
    User {
        id,
        is_bot: false,
        first_name: "Ada".to_owned(),
        last_name: None,
        username: None,
    }
}

pub fn private_chat(id: i64) -> Chat {
    Chat {
        id,
        kind: "private".to_owned(),
        title: None,
        username: None,
    }
}

pub fn message_from(user_id: i64, text: &str) -> Message {
    let entities = command_entity(text).into_iter().collect();
    Message {
        message_id: 1,
        from: Some(user(user_id)),
        chat: private_chat(user_id),
        date: 1_700_000_000,
        text: Some(text.to_owned()),
        entities,
    }
}

/// Leading `bot_command` entity, as Telegram would attach it.
fn command_entity(text: &str) -> Option<MessageEntity> {
    if !text.starts_with('/') {
        return None;
    }
    let len = text.find(' ').unwrap_or(text.len());
    Some(MessageEntity {
        kind: "bot_command".to_owned(),
        offset: 0,
        length: i64::try_from(len).unwrap_or(i64::MAX),
    })
}

pub fn text_update(id: i64, user_id: i64, text: &str) -> Update {
    Update::new(id, UpdateKind::Message(message_from(user_id, text)))
}

pub fn update(id: i64) -> Update {
    text_update(id, USER_ID, "hi")
}

pub fn callback_update(id: i64, data: &str) -> Update {
    Update::new(
        id,
        UpdateKind::CallbackQuery(CallbackQuery {
            id: format!("cb{id}"),
            from: user(USER_ID),
            message: Some(message_from(USER_ID, "pick one")),
            data: Some(data.to_owned()),
        }),
    )
}

pub fn api_error() -> FetchError {
    FetchError::Api {
        code: 502,
        description: "Bad Gateway".to_owned(),
    }
}

/// Returns scripted batches in order, then empty batches after a short sleep.
#[derive(Default)]
pub struct ScriptedFetcher {
    batches: Mutex<VecDeque<Result<Vec<Update>, FetchError>>>,
    offsets: Mutex<Vec<i64>>,
}

impl ScriptedFetcher {
    pub fn new(batches: Vec<Result<Vec<Update>, FetchError>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            offsets: Mutex::new(Vec::new()),
        }
    }

    /// Offsets seen by each call, in call order.
    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().expect("offsets lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.offsets.lock().expect("offsets lock").len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn get_updates(&self, request: &PollRequest) -> Result<Vec<Update>, FetchError> {
        self.offsets
            .lock()
            .expect("offsets lock")
            .push(request.offset);
        let next = self.batches.lock().expect("batches lock").pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Fails every call.
#[derive(Default)]
pub struct FailingFetcher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn get_updates(&self, _request: &PollRequest) -> Result<Vec<Update>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(api_error())
    }
}

/// Records the id of every update it handles.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<i64>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<i64> {
        let mut seen = self.seen.lock().expect("seen lock").clone();
        seen.sort_unstable();
        seen
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle_update(&self, _cancel: CancellationToken, update: &Update) {
        self.seen.lock().expect("seen lock").push(update.id);
    }
}

/// Counts invocations.
#[derive(Default)]
pub struct CountingHandler {
    hits: AtomicUsize,
}

impl CountingHandler {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn handle_update(&self, _cancel: CancellationToken, _update: &Update) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` every millisecond until it holds, panicking after 5s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 5s");
}
