//! Inbound update model for the Telegram Bot API (minimal subset).
//!
//! An [`Update`] is immutable once decoded. Its `update_id` is strictly
//! increasing across the stream, which is what the poller's cursor relies on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity type Telegram assigns to `/command` spans.
pub const ENTITY_BOT_COMMAND: &str = "bot_command";

/// One inbound notification from the Bot API.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawUpdate")]
pub struct Update {
    /// Monotonic sequence id assigned by Telegram.
    pub id: i64,
    /// Payload, discriminated by activity kind.
    pub kind: UpdateKind,
}

/// Payload of an [`Update`].
#[derive(Debug, Clone)]
pub enum UpdateKind {
    /// New incoming message.
    Message(Message),
    /// A known message was edited.
    EditedMessage(Message),
    /// New channel post.
    ChannelPost(Message),
    /// A known channel post was edited.
    EditedChannelPost(Message),
    /// Inline keyboard button press.
    CallbackQuery(CallbackQuery),
    /// Any update type this crate does not model.
    Unknown,
}

/// Wire shape of an update: one optional field per kind.
#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<Message>,
    edited_message: Option<Message>,
    channel_post: Option<Message>,
    edited_channel_post: Option<Message>,
    callback_query: Option<CallbackQuery>,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let kind = if let Some(msg) = raw.message {
            UpdateKind::Message(msg)
        } else if let Some(msg) = raw.edited_message {
            UpdateKind::EditedMessage(msg)
        } else if let Some(msg) = raw.channel_post {
            UpdateKind::ChannelPost(msg)
        } else if let Some(msg) = raw.edited_channel_post {
            UpdateKind::EditedChannelPost(msg)
        } else if let Some(cb) = raw.callback_query {
            UpdateKind::CallbackQuery(cb)
        } else {
            UpdateKind::Unknown
        };
        Self {
            id: raw.update_id,
            kind,
        }
    }
}

impl Update {
    /// Build an update directly (used by fetchers other than the Bot API and in tests).
    pub fn new(id: i64, kind: UpdateKind) -> Self {
        Self { id, kind }
    }

    /// The message carried by this update, for every message-bearing kind.
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(msg)
            | UpdateKind::EditedMessage(msg)
            | UpdateKind::ChannelPost(msg)
            | UpdateKind::EditedChannelPost(msg) => Some(msg),
            UpdateKind::CallbackQuery(_) | UpdateKind::Unknown => None,
        }
    }

    /// The callback query, if this update is one.
    pub fn callback_query(&self) -> Option<&CallbackQuery> {
        match &self.kind {
            UpdateKind::CallbackQuery(cb) => Some(cb),
            _ => None,
        }
    }

    /// The user who caused this update, if Telegram reported one.
    pub fn sender(&self) -> Option<&User> {
        match &self.kind {
            UpdateKind::CallbackQuery(cb) => Some(&cb.from),
            _ => self.message().and_then(|msg| msg.from.as_ref()),
        }
    }

    /// The chat the update belongs to.
    pub fn chat(&self) -> Option<&Chat> {
        match &self.kind {
            UpdateKind::CallbackQuery(cb) => cb.message.as_ref().map(|msg| &msg.chat),
            _ => self.message().map(|msg| &msg.chat),
        }
    }
}

/// Telegram `Message` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id, unique within the chat.
    pub message_id: i64,
    /// Sender. Empty for channel posts.
    #[serde(default)]
    pub from: Option<User>,
    /// Chat the message was sent to.
    pub chat: Chat,
    /// Unix timestamp of the send.
    #[serde(default)]
    pub date: i64,
    /// UTF-8 text for text messages.
    #[serde(default)]
    pub text: Option<String>,
    /// Special entities (commands, mentions, urls) in the text.
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

impl Message {
    /// Text of the message, or an empty string.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Sender id, if the message has a sender.
    pub fn sender_id(&self) -> Option<i64> {
        self.from.as_ref().map(|user| user.id)
    }

    /// Send time as a UTC timestamp.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }

    /// True if the message starts with a `bot_command` entity.
    pub fn is_command(&self) -> bool {
        self.entities
            .first()
            .is_some_and(|entity| entity.offset == 0 && entity.is_command())
    }

    /// Command name without the leading slash and without any `@botname` suffix.
    ///
    /// Empty when the message is not a command.
    pub fn command(&self) -> &str {
        let command = self.command_with_at();
        match command.find('@') {
            Some(at) => &command[..at],
            None => command,
        }
    }

    /// Command name without the leading slash, keeping any `@botname` suffix.
    pub fn command_with_at(&self) -> &str {
        let Some(end) = self.command_end() else {
            return "";
        };
        self.text().get(1..end).unwrap_or_default()
    }

    /// Everything after the command name, skipping the single separator
    /// character that follows it.
    ///
    /// `/foo bar baz` yields `bar baz`.
    pub fn command_arguments(&self) -> &str {
        let Some(end) = self.command_end() else {
            return "";
        };
        let rest = self.text().get(end..).unwrap_or_default();
        let mut chars = rest.chars();
        chars.next();
        chars.as_str()
    }

    /// Byte index where the leading command entity ends.
    fn command_end(&self) -> Option<usize> {
        if !self.is_command() {
            return None;
        }
        let entity = self.entities.first()?;
        utf16_to_byte_index(self.text(), entity.length)
    }
}

/// Convert a UTF-16 code unit count (Telegram's entity unit) into a byte index.
fn utf16_to_byte_index(text: &str, units: i64) -> Option<usize> {
    let target = usize::try_from(units).ok()?;
    let mut seen: usize = 0;
    for (idx, ch) in text.char_indices() {
        if seen >= target {
            return Some(idx);
        }
        seen = seen.saturating_add(ch.len_utf16());
    }
    (seen >= target).then_some(text.len())
}

/// Telegram `MessageEntity` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntity {
    /// Entity type, e.g. `bot_command`, `mention`, `url`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Offset in UTF-16 code units.
    pub offset: i64,
    /// Length in UTF-16 code units.
    pub length: i64,
}

impl MessageEntity {
    /// True for `/command` entities.
    pub fn is_command(&self) -> bool {
        self.kind == ENTITY_BOT_COMMAND
    }
}

/// Telegram `User` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user id.
    pub id: i64,
    /// True for bots.
    #[serde(default)]
    pub is_bot: bool,
    /// First name.
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Username without the leading `@`.
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    /// Username when set, otherwise first and last name.
    pub fn display_name(&self) -> String {
        if let Some(username) = &self.username {
            return username.clone();
        }
        match &self.last_name {
            Some(last) => format!("{} {last}", self.first_name),
            None => self.first_name.clone(),
        }
    }

    /// Markdown inline mention linking to the user.
    pub fn mention_markdown(&self) -> String {
        format!("[{}](tg://user?id={})", self.display_name(), self.id)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Telegram `Chat` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Chat id.
    pub id: i64,
    /// `private`, `group`, `supergroup` or `channel`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Title for groups and channels.
    #[serde(default)]
    pub title: Option<String>,
    /// Username for private chats and public channels.
    #[serde(default)]
    pub username: Option<String>,
}

impl Chat {
    /// True for one-to-one chats with a user.
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

/// Telegram `CallbackQuery` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    /// Query id, needed to answer the query.
    pub id: String,
    /// User who pressed the button.
    pub from: User,
    /// Message the button was attached to, if still available.
    #[serde(default)]
    pub message: Option<Message>,
    /// Callback data attached to the button.
    #[serde(default)]
    pub data: Option<String>,
}
