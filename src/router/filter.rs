//! Declarative update predicates used as routing guards.

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use crate::types::{Update, UpdateKind};

/// Custom predicate. Must be cheap and non-blocking.
pub type Predicate = Arc<dyn Fn(&Update) -> bool + Send + Sync>;

/// Accept/reject guard for a routing node.
#[derive(Clone)]
pub enum Filter {
    /// Accepts everything.
    Any,
    /// New messages only.
    Message,
    /// Edited messages only.
    EditedMessage,
    /// Callback queries only.
    CallbackQuery,
    /// Channel posts, new or edited.
    ChannelPost,
    /// Messages whose command (without slash or `@bot`) equals the name.
    Command(String),
    /// Messages whose text starts with the prefix.
    TextPrefix(String),
    /// Callback queries whose data starts with the prefix.
    CallbackDataPrefix(String),
    /// Updates sent by the given user id.
    FromUser(i64),
    /// Updates from one-to-one chats.
    PrivateChat,
    /// Accepts when every inner filter accepts.
    All(Vec<Filter>),
    /// Inverts the inner filter.
    Not(Box<Filter>),
    /// Arbitrary predicate.
    Custom(Predicate),
}

impl Filter {
    /// Match `/name` commands.
    pub fn command(name: impl Into<String>) -> Self {
        Self::Command(name.into())
    }

    /// Match message text by prefix.
    pub fn text_prefix(prefix: impl Into<String>) -> Self {
        Self::TextPrefix(prefix.into())
    }

    /// Match callback data by prefix.
    pub fn callback_data_prefix(prefix: impl Into<String>) -> Self {
        Self::CallbackDataPrefix(prefix.into())
    }

    /// Wrap a closure.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Update) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::All(mut filters) => {
                filters.push(other);
                Self::All(filters)
            }
            first => Self::All(vec![first, other]),
        }
    }

    /// Evaluate the guard.
    pub fn accepts(&self, update: &Update) -> bool {
        match self {
            Self::Any => true,
            Self::Message => matches!(update.kind, UpdateKind::Message(_)),
            Self::EditedMessage => matches!(update.kind, UpdateKind::EditedMessage(_)),
            Self::CallbackQuery => matches!(update.kind, UpdateKind::CallbackQuery(_)),
            Self::ChannelPost => matches!(
                update.kind,
                UpdateKind::ChannelPost(_) | UpdateKind::EditedChannelPost(_)
            ),
            Self::Command(name) => update
                .message()
                .is_some_and(|msg| msg.is_command() && msg.command() == name.as_str()),
            Self::TextPrefix(prefix) => update
                .message()
                .and_then(|msg| msg.text.as_deref())
                .is_some_and(|text| text.starts_with(prefix.as_str())),
            Self::CallbackDataPrefix(prefix) => update
                .callback_query()
                .and_then(|cb| cb.data.as_deref())
                .is_some_and(|data| data.starts_with(prefix.as_str())),
            Self::FromUser(id) => update.sender().is_some_and(|user| user.id == *id),
            Self::PrivateChat => update.chat().is_some_and(|chat| chat.is_private()),
            Self::All(filters) => filters.iter().all(|filter| filter.accepts(update)),
            Self::Not(inner) => !inner.accepts(update),
            Self::Custom(predicate) => predicate(update),
        }
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Self::Output {
        Filter::Not(Box::new(self))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Message => f.write_str("Message"),
            Self::EditedMessage => f.write_str("EditedMessage"),
            Self::CallbackQuery => f.write_str("CallbackQuery"),
            Self::ChannelPost => f.write_str("ChannelPost"),
            Self::Command(name) => f.debug_tuple("Command").field(name).finish(),
            Self::TextPrefix(prefix) => f.debug_tuple("TextPrefix").field(prefix).finish(),
            Self::CallbackDataPrefix(prefix) => {
                f.debug_tuple("CallbackDataPrefix").field(prefix).finish()
            }
            Self::FromUser(id) => f.debug_tuple("FromUser").field(id).finish(),
            Self::PrivateChat => f.write_str("PrivateChat"),
            Self::All(filters) => f.debug_tuple("All").field(filters).finish(),
            Self::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
