//! Per-user conversation state machines.
//!
//! A [`Conversation`] maps each user to a [`ConversationState`] held in a
//! [`StateStore`] that forgets idle users. Incoming messages are matched
//! against the ordered [`Choice`] list registered for the user's current
//! state; the first accepting choice decides the next state.
//! [`ConversationState::FINISHED`] ends the conversation and drops the entry.
//!
//! `handle` is get-decide-set over independent store operations. Concurrent
//! messages from the same user are not serialised here.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handler::Handler;
use crate::types::{Message, Update, UpdateKind};

pub mod store;

pub use store::StateStore;

/// Default idle time after which a user's conversation is forgotten.
pub const DEFAULT_CONVERSATION_TTL: Duration = Duration::from_secs(600);

/// A state in a conversation graph. `0` is reserved for [`Self::FINISHED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationState(pub u32);

impl ConversationState {
    /// Terminal state. Transitioning here removes the user.
    pub const FINISHED: Self = Self(0);

    /// Wrap a raw state value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// True for the reserved terminal state.
    pub fn is_finished(self) -> bool {
        self == Self::FINISHED
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures from [`Conversation::handle`]. The user's state is unchanged
/// in every case.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// The user has no live conversation (never added, finished, or expired).
    #[error("no such conversation")]
    NoSuchConversation,
    /// No choice registered for the current state accepted the message.
    #[error("no such choice in state {state}")]
    NoSuchChoice {
        /// State the user is still in.
        state: ConversationState,
    },
    /// The accepting choice's apply step failed.
    #[error(transparent)]
    Transition(anyhow::Error),
}

/// Acceptance predicate for a [`Choice`]. Must be cheap and non-blocking.
pub type AcceptFn = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Boxed future returned by an apply step.
pub type ApplyFuture = Pin<Box<dyn Future<Output = anyhow::Result<ConversationState>> + Send>>;

/// Apply step for a [`Choice`].
pub type ApplyFn = Arc<dyn Fn(CancellationToken, Message) -> ApplyFuture + Send + Sync>;

/// One guarded transition out of a state.
#[derive(Clone)]
pub struct Choice {
    accept: Option<AcceptFn>,
    apply: ApplyFn,
}

impl Choice {
    /// Choice that always accepts and runs `apply`.
    pub fn new<F, Fut>(apply: F) -> Self
    where
        F: Fn(CancellationToken, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ConversationState>> + Send + 'static,
    {
        let apply_fn: ApplyFn = Arc::new(
            move |cancel: CancellationToken, message: Message| -> ApplyFuture {
                Box::pin(apply(cancel, message))
            },
        );
        Self {
            accept: None,
            apply: apply_fn,
        }
    }

    /// Choice that moves straight to `next` with no side effects.
    pub fn goto(next: ConversationState) -> Self {
        Self::new(move |_, _| async move { Ok(next) })
    }

    /// Only accept messages for which `accept` returns true.
    pub fn when<A>(mut self, accept: A) -> Self
    where
        A: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.accept = Some(Arc::new(accept));
        self
    }

    fn accepts(&self, message: &Message) -> bool {
        self.accept.as_ref().map_or(true, |accept| accept(message))
    }
}

impl fmt::Debug for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Choice")
            .field("guarded", &self.accept.is_some())
            .finish_non_exhaustive()
    }
}

/// Settings for a [`Conversation`]'s state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationOptions {
    /// Idle time after which a user is forgotten.
    pub ttl: Duration,
    /// Whether looking a user up refreshes their expiry.
    pub extend_on_read: bool,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CONVERSATION_TTL,
            extend_on_read: true,
        }
    }
}

/// Per-user finite state machine.
pub struct Conversation {
    /// Frozen once the conversation is shared; mutation needs `&mut self`.
    states: HashMap<ConversationState, Vec<Choice>>,
    store: Arc<StateStore<i64, ConversationState>>,
    sweeper: CancellationToken,
}

impl Conversation {
    /// Empty conversation with no choices and no users.
    pub fn new(options: ConversationOptions) -> Self {
        let store = StateStore::new(options.ttl).with_extend_on_read(options.extend_on_read);
        Self {
            states: HashMap::new(),
            store: Arc::new(store),
            sweeper: CancellationToken::new(),
        }
    }

    /// Append choices for `state`, after any already registered.
    pub fn add_choices(
        &mut self,
        state: ConversationState,
        choices: impl IntoIterator<Item = Choice>,
    ) {
        self.states.entry(state).or_default().extend(choices);
    }

    /// Put `user_id` into `state`, overwriting any previous state and
    /// resetting expiry. Adding a user in the finished state removes them.
    pub fn add_user(&self, user_id: i64, state: ConversationState) {
        if state.is_finished() {
            self.store.remove(&user_id);
            return;
        }
        self.store.insert(user_id, state);
    }

    /// Current state of `user_id`, if their conversation is live.
    pub fn user_state(&self, user_id: i64) -> Option<ConversationState> {
        self.store.get(&user_id)
    }

    /// True if `user_id` has a live conversation.
    pub fn check_user(&self, user_id: i64) -> bool {
        self.store.contains(&user_id)
    }

    /// Drop `user_id`'s conversation.
    pub fn remove_user(&self, user_id: i64) {
        self.store.remove(&user_id);
    }

    /// Users currently stored, including expired ones not yet swept.
    pub fn active_users(&self) -> usize {
        self.store.len()
    }

    /// Feed one message from its sender into the state machine.
    ///
    /// Returns the new state. On any error the stored state is untouched.
    pub async fn handle(
        &self,
        cancel: &CancellationToken,
        message: &Message,
    ) -> Result<ConversationState, ConversationError> {
        let user_id = message
            .sender_id()
            .ok_or(ConversationError::NoSuchConversation)?;
        let state = self
            .store
            .get(&user_id)
            .ok_or(ConversationError::NoSuchConversation)?;

        let choice = self
            .states
            .get(&state)
            .and_then(|choices| choices.iter().find(|choice| choice.accepts(message)))
            .ok_or(ConversationError::NoSuchChoice { state })?;

        let next = (choice.apply)(cancel.clone(), message.clone())
            .await
            .map_err(ConversationError::Transition)?;

        if next.is_finished() {
            self.store.remove(&user_id);
        } else {
            self.store.insert(user_id, next);
        }
        debug!(user_id, from = %state, to = %next, "conversation advanced");
        Ok(next)
    }

    /// Start a background task that purges expired users every `interval`.
    ///
    /// Runs until [`Self::stop`] is called or the conversation is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let stop = self.sweeper.clone();
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, "expired conversations purged");
                        }
                    }
                }
            }
        })
    }

    /// Stop the sweeper task, if any.
    pub fn stop(&self) {
        self.sweeper.cancel();
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[async_trait]
impl Handler for Conversation {
    async fn handle_update(&self, cancel: CancellationToken, update: &Update) {
        // Edits and channel posts are not answers.
        let UpdateKind::Message(message) = &update.kind else {
            return;
        };
        match self.handle(&cancel, message).await {
            Ok(next) => debug!(update_id = update.id, state = %next, "conversation step done"),
            Err(ConversationError::NoSuchConversation) => {
                debug!(update_id = update.id, "sender has no active conversation");
            }
            Err(err) => warn!(update_id = update.id, error = %err, "conversation step failed"),
        }
    }
}
