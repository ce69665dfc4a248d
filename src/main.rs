//! botpoll CLI entry point.
//!
//! Provides `run` to start a demo bot over the Telegram Bot API and
//! `check-config` to print the effective configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use botpoll::config::Config;
use botpoll::conversation::{Choice, Conversation, ConversationState};
use botpoll::fetcher::{BotApi, Fetcher};
use botpoll::handler::{handler_fn, Handler};
use botpoll::logging::{self, LoggingGuard};
use botpoll::poller::LongPoller;
use botpoll::router::{Filter, Router};
use botpoll::types::{Message, Update};

/// Conversation state: waiting for the user's name.
const ASK_NAME: ConversationState = ConversationState::new(1);
/// Conversation state: waiting for the user's age.
const ASK_AGE: ConversationState = ConversationState::new(2);

/// botpoll — long-polling Telegram bot runner.
#[derive(Parser)]
#[command(name = "botpoll", version, about)]
struct Cli {
    /// Config file (defaults to `$BOTPOLL_CONFIG_PATH` or `~/.botpoll/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Poll for updates until Ctrl-C, then shut down gracefully.
    Run,
    /// Load the configuration and print it as TOML.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // A missing .env is fine; the token may come from the real environment.
    let _ = dotenvy::dotenv();

    let config = match &cli.config {
        Some(path) => Config::load_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Run => handle_run(config).await,
        Command::CheckConfig => handle_check_config(&config),
    }
}

/// Print the effective configuration.
fn handle_check_config(config: &Config) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render config")?;
    println!("{rendered}");
    Ok(())
}

/// Install file+console logging when a log dir is configured, console otherwise.
fn init_logging(config: &Config) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.logging.dir {
        Some(dir) => Ok(Some(logging::init_production(dir, &config.logging.level)?)),
        None => {
            logging::init_cli(&config.logging.level)?;
            Ok(None)
        }
    }
}

/// Run the demo bot until Ctrl-C.
async fn handle_run(config: Config) -> anyhow::Result<()> {
    let _logging_guard = init_logging(&config)?;

    let token = config.bot_token(|key| std::env::var(key).ok())?;
    let api = Arc::new(BotApi::with_endpoint(
        token,
        config.telegram.api_endpoint.clone(),
        reqwest::Client::new(),
    ));

    let conversation = Arc::new(build_conversation(&config, Arc::clone(&api)));
    let _sweeper = conversation.spawn_sweeper(config.conversation.sweep_interval());

    let router = build_router(Arc::clone(&api), Arc::clone(&conversation));
    info!(routes = ?router.route_names(), "router built");

    let fetcher: Arc<dyn Fetcher> = api;
    let poller = Arc::new(LongPoller::new(
        fetcher,
        Arc::new(router),
        config.poller.poller_options(),
    ));

    let mut request = config.poller.poll_request();
    let listener = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move {
            poller.listen(&mut request).await;
            request.offset
        })
    };

    info!("botpoll ready -- listening for updates");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal, initiating graceful shutdown");

    if let Err(e) = poller.shutdown(config.poller.shutdown_timeout()).await {
        warn!(error = %e, "graceful shutdown incomplete");
    }
    conversation.stop();

    match listener.await {
        Ok(offset) => info!(offset, "botpoll shut down"),
        Err(e) => warn!(error = %e, "listener task failed"),
    }
    Ok(())
}

/// Two-step questionnaire: name, then age.
fn build_conversation(config: &Config, api: Arc<BotApi>) -> Conversation {
    let mut conversation = Conversation::new(config.conversation.options());

    let name_api = Arc::clone(&api);
    conversation.add_choices(
        ASK_NAME,
        [Choice::new(move |_cancel, message: Message| {
            let api = Arc::clone(&name_api);
            async move {
                let text = format!("Nice to meet you, {}. How old are you?", message.text());
                api.send_message(message.chat.id, &text).await?;
                Ok::<_, anyhow::Error>(ASK_AGE)
            }
        })
        .when(|message| !message.text().is_empty() && !message.is_command())],
    );

    let age_api = Arc::clone(&api);
    let retry_api = api;
    conversation.add_choices(
        ASK_AGE,
        [
            Choice::new(move |_cancel, message: Message| {
                let api = Arc::clone(&age_api);
                async move {
                    let text = format!("Got it, {} years. Thanks!", message.text().trim());
                    api.send_message(message.chat.id, &text).await?;
                    Ok::<_, anyhow::Error>(ConversationState::FINISHED)
                }
            })
            .when(|message| message.text().trim().parse::<u8>().is_ok()),
            Choice::new(move |_cancel, message: Message| {
                let api = Arc::clone(&retry_api);
                async move {
                    api.send_message(message.chat.id, "Please send your age as a number.")
                        .await?;
                    Ok::<_, anyhow::Error>(ASK_AGE)
                }
            }),
        ],
    );

    conversation
}

/// `/start` and `/cancel` commands, the questionnaire, and an echo fallback
/// for private chats.
fn build_router(api: Arc<BotApi>, conversation: Arc<Conversation>) -> Router {
    let tracked = Arc::clone(&conversation);
    let in_conversation = Filter::custom(move |update| {
        update
            .sender()
            .is_some_and(|user| tracked.check_user(user.id))
    });

    let start = {
        let api = Arc::clone(&api);
        let conversation = Arc::clone(&conversation);
        handler_fn(move |_cancel, update: Update| {
            let api = Arc::clone(&api);
            let conversation = Arc::clone(&conversation);
            async move {
                let (Some(user), Some(chat)) = (update.sender(), update.chat()) else {
                    return;
                };
                conversation.add_user(user.id, ASK_NAME);
                reply(&api, chat.id, "Hi! What's your name?").await;
            }
        })
    };

    let cancel = {
        let api = Arc::clone(&api);
        let conversation = Arc::clone(&conversation);
        handler_fn(move |_cancel, update: Update| {
            let api = Arc::clone(&api);
            let conversation = Arc::clone(&conversation);
            async move {
                let (Some(user), Some(chat)) = (update.sender(), update.chat()) else {
                    return;
                };
                conversation.remove_user(user.id);
                reply(&api, chat.id, "Cancelled.").await;
            }
        })
    };

    let echo = handler_fn(move |_cancel, update: Update| {
        let api = Arc::clone(&api);
        async move {
            let Some(message) = update.message() else {
                return;
            };
            if message.text().is_empty() {
                return;
            }
            reply(&api, message.chat.id, message.text()).await;
        }
    });

    let questionnaire: Arc<dyn Handler> = conversation;

    Router::builder()
        .route("start", Filter::command("start"), start)
        .route("cancel", Filter::command("cancel"), cancel)
        .route(
            "questionnaire",
            Filter::Message.and(in_conversation),
            questionnaire,
        )
        .branch("private", Filter::PrivateChat, |b| {
            b.route("echo", Filter::Message, echo)
        })
        .build()
}

/// Send a reply, logging failures.
async fn reply(api: &BotApi, chat_id: i64, text: &str) {
    if let Err(e) = api.send_message(chat_id, text).await {
        warn!(chat_id, error = %e, "failed to send reply");
    }
}
