//! botpoll — long-polling update dispatcher for Telegram bots.
//!
//! A single [`poller::LongPoller`] fetches updates with a monotonic cursor
//! and spawns one task per update. Tasks run a [`handler::Handler`]: usually
//! a [`router::Router`] priority tree, a [`conversation::Conversation`]
//! state machine, or both wired together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod fetcher;
pub mod handler;

pub mod conversation;
pub mod poller;
pub mod router;
