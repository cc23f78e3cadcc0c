//! Command, message and callback handlers for the Telegram bot.

use std::sync::Arc;

use chatrelay_core::{
    split_message, truncate_chars, IncomingPrompt, RelayOutcome, UserStats, TELEGRAM_MESSAGE_LIMIT,
};
use chrono::{DateTime, Utc};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    MessageId, ParseMode, ReplyParameters,
};
use teloxide::utils::command::BotCommands;
use teloxide::RequestError;
use tracing::{debug, error, info, warn};

use crate::state::BotState;

/// Reply-keyboard label that starts a conversation.
pub const START_CHAT_BUTTON: &str = "💬 Start chat";

/// Reply-keyboard label that shows help.
pub const HELP_BUTTON: &str = "❓ Help";

/// Characters of a document forwarded upstream.
pub const DOCUMENT_CHAR_LIMIT: usize = 4000;

const CALLBACK_ABOUT: &str = "about";
const CALLBACK_STATS: &str = "stats";

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,

    #[command(description = "Show this help")]
    Help,

    #[command(description = "Forget our conversation so far")]
    Reset,

    #[command(description = "Open the menu")]
    Menu,

    #[command(description = "Show your usage today")]
    Stats,
}

/// Command bound to a reply-keyboard button label, if any.
pub fn button_command(text: &str) -> Option<Command> {
    match text.trim() {
        START_CHAT_BUTTON => Some(Command::Start),
        HELP_BUTTON => Some(Command::Help),
        _ => None,
    }
}

fn sender(msg: &Message) -> Option<(u64, Option<String>)> {
    msg.from.as_ref().map(|u| (u.id.0, u.username.clone()))
}

/// Human form of the time left until `resets_at`, e.g. `3h 12m`.
pub fn format_wait(resets_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (resets_at - now).num_minutes().max(1);
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}m", h, m),
    }
}

pub fn limit_message(resets_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format!(
        "⚠️ Daily message limit reached. Try again in {}.",
        format_wait(resets_at, now)
    )
}

pub fn stats_text(stats: &UserStats, now: DateTime<Utc>) -> String {
    let quota = match (stats.usage.limit, stats.usage.remaining()) {
        (Some(limit), Some(remaining)) => format!(
            "Messages today: {}/{}\nRemaining: {}\nResets in: {}",
            stats.usage.used,
            limit,
            remaining,
            format_wait(stats.usage.resets_at, now)
        ),
        _ => format!("Messages today: {} (no limit)", stats.usage.used),
    };
    format!(
        "📊 Your stats\n\n{}\nMessages in history: {}",
        quota, stats.history_len
    )
}

pub fn about_text(model: &str) -> String {
    format!(
        "🤖 I relay your messages to an AI model and send back its answer.\n\n\
        Model: {}\n\
        I remember recent messages, so you can ask follow-up questions. \
        Use /reset to start over.",
        model
    )
}

/// Prompt built from a document's raw bytes.
pub fn document_prompt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let (head, _) = truncate_chars(&text, DOCUMENT_CHAR_LIMIT);
    format!("Document contents:\n{}", head)
}

fn start_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(START_CHAT_BUTTON),
        KeyboardButton::new(HELP_BUTTON),
    ]])
    .resize_keyboard()
}

fn menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("🤖 About", CALLBACK_ABOUT)],
        vec![InlineKeyboardButton::callback("📊 Stats", CALLBACK_STATS)],
    ])
}

/// Send `text` in Telegram-sized chunks, the first replying to `reply_to`.
///
/// Each chunk is sent as Markdown; if Telegram rejects the markup the chunk is
/// sent again as plain text.
pub async fn send_reply(
    bot: &Bot,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
    text: &str,
) -> ResponseResult<()> {
    for (i, chunk) in split_message(text, TELEGRAM_MESSAGE_LIMIT)
        .into_iter()
        .enumerate()
    {
        let reply_to = reply_to.filter(|_| i == 0);

        let mut request = bot
            .send_message(chat_id, chunk.clone())
            .parse_mode(ParseMode::Markdown);
        if let Some(id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(id));
        }

        match request.await {
            Ok(_) => {}
            Err(RequestError::Api(e)) => {
                debug!(chat_id = %chat_id, error = %e, "Markdown rejected, resending as plain text");
                let mut plain = bot.send_message(chat_id, chunk);
                if let Some(id) = reply_to {
                    plain = plain.reply_parameters(ReplyParameters::new(id));
                }
                plain.await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Handle the /start command.
pub async fn handle_start(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let name = msg
        .from
        .as_ref()
        .map(|u| u.first_name.clone())
        .unwrap_or_else(|| "there".to_string());

    let welcome = format!(
        "👋 Hi, {}!\n\n\
        Send me any message and I'll answer with {}.\n\
        Type /help to see what else I can do.",
        name,
        state.relay.model()
    );

    bot.send_message(msg.chat.id, welcome)
        .reply_markup(start_keyboard())
        .await?;

    info!(chat_id = %msg.chat.id, user = ?msg.from.as_ref().map(|u| &u.username), "User started bot");
    Ok(())
}

/// Handle the /help command.
pub async fn handle_help(bot: Bot, msg: Message) -> ResponseResult<()> {
    let help_text = format!(
        "{}\n\nYou can also send a text document and I'll read it.",
        Command::descriptions()
    );
    bot.send_message(msg.chat.id, help_text).await?;
    Ok(())
}

pub async fn handle_reset(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some((user_id, _)) = sender(&msg) else {
        return Ok(());
    };

    let text = if state.relay.reset_history(user_id).await {
        "🧹 Conversation history cleared."
    } else {
        "Nothing to clear, the history is already empty."
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn handle_menu(bot: Bot, msg: Message) -> ResponseResult<()> {
    bot.send_message(msg.chat.id, "Menu:")
        .reply_markup(menu_keyboard())
        .await?;
    Ok(())
}

pub async fn handle_stats(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some((user_id, username)) = sender(&msg) else {
        return Ok(());
    };

    let stats = state.relay.stats(user_id, username.as_deref()).await;
    bot.send_message(msg.chat.id, stats_text(&stats, Utc::now()))
        .await?;
    Ok(())
}

/// Dispatch commands to appropriate handlers.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    match cmd {
        Command::Start => handle_start(bot, msg, state).await,
        Command::Help => handle_help(bot, msg).await,
        Command::Reset => handle_reset(bot, msg, state).await,
        Command::Menu => handle_menu(bot, msg).await,
        Command::Stats => handle_stats(bot, msg, state).await,
    }
}

/// Handle inline keyboard presses from /menu.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    // Stop the client's loading spinner whatever the button was.
    bot.answer_callback_query(q.id.clone()).await?;

    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat().id)
        .unwrap_or_else(|| ChatId::from(q.from.id));

    let text = match q.data.as_deref() {
        Some(CALLBACK_ABOUT) => about_text(state.relay.model()),
        Some(CALLBACK_STATS) => {
            let stats = state
                .relay
                .stats(q.from.id.0, q.from.username.as_deref())
                .await;
            stats_text(&stats, Utc::now())
        }
        other => {
            warn!(data = ?other, "Unknown callback data");
            return Ok(());
        }
    };

    bot.send_message(chat_id, text).await?;
    Ok(())
}

/// Rate-check the sender, relay the prompt and send the answer.
async fn relay_prompt(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    prompt: IncomingPrompt,
) -> ResponseResult<()> {
    bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;

    match state.relay.handle(&prompt).await {
        RelayOutcome::Reply { text, source } => {
            debug!(chat_id = %msg.chat.id, user = ?prompt.username, source = ?source, "Relaying reply");
            send_reply(bot, msg.chat.id, Some(msg.id), &text).await
        }
        RelayOutcome::Failed { reply } => {
            bot.send_message(msg.chat.id, reply).await?;
            Ok(())
        }
        RelayOutcome::Limited { resets_at } => {
            info!(chat_id = %msg.chat.id, user_id = prompt.user_id, "Daily limit reached");
            bot.send_message(msg.chat.id, limit_message(resets_at, Utc::now()))
                .await?;
            Ok(())
        }
    }
}

/// Handle regular text messages (relay to the model).
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if let Some(cmd) = button_command(text) {
        return match cmd {
            Command::Start => {
                bot.send_message(msg.chat.id, "Go ahead, send me your question.")
                    .await?;
                Ok(())
            }
            other => handle_command(bot, msg.clone(), other, state).await,
        };
    }

    let Some((user_id, username)) = sender(&msg) else {
        return Ok(());
    };

    let prompt = IncomingPrompt {
        user_id,
        username,
        text: text.to_string(),
    };
    relay_prompt(&bot, &msg, &state, prompt).await
}

/// Handle documents: download, decode and relay their text.
pub async fn handle_document(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(doc) = msg.document() else {
        return Ok(());
    };
    let Some((user_id, username)) = sender(&msg) else {
        return Ok(());
    };

    let mut bytes: Vec<u8> = Vec::new();
    let downloaded: Result<(), String> = async {
        let file = bot
            .get_file(doc.file.id.clone())
            .await
            .map_err(|e| e.to_string())?;
        bot.download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| e.to_string())
    }
    .await;

    if let Err(e) = downloaded {
        error!(chat_id = %msg.chat.id, error = %e, "Failed to download document");
        bot.send_message(msg.chat.id, "🚫 Could not read that document.")
            .await?;
        return Ok(());
    }

    info!(
        chat_id = %msg.chat.id,
        file_name = ?doc.file_name,
        bytes = bytes.len(),
        "Document received"
    );
    let prompt = IncomingPrompt {
        user_id,
        username,
        text: document_prompt(&bytes),
    };
    relay_prompt(&bot, &msg, &state, prompt).await
}

/// Voice messages are not transcribed; say so without using quota.
pub async fn handle_voice(bot: Bot, msg: Message) -> ResponseResult<()> {
    bot.send_message(
        msg.chat.id,
        "🎙 Voice messages are not supported yet. Please send text.",
    )
    .reply_parameters(ReplyParameters::new(msg.id))
    .await?;
    Ok(())
}
