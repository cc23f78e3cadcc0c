//! Main Telegram bot implementation.

use std::sync::Arc;
use std::time::Duration;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{Result, TelegramError};
use crate::handlers::{
    handle_callback, handle_command, handle_document, handle_message, handle_voice, Command,
};
use crate::state::BotState;

/// The relay bot.
pub struct ChatBot {
    /// The teloxide bot instance.
    bot: Bot,
    /// Shared state across handlers.
    state: Arc<BotState>,
}

impl ChatBot {
    /// Create a bot from `TELEGRAM_BOT_TOKEN`.
    pub fn new(state: Arc<BotState>) -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(TelegramError::NoToken)?;

        Ok(Self::with_token(token, state))
    }

    pub fn with_token(token: impl Into<String>, state: Arc<BotState>) -> Self {
        Self {
            bot: Bot::new(token),
            state,
        }
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| TelegramError::BotStartFailed(e.to_string()))?;
        Ok(me.username().to_string())
    }

    /// Run the dispatcher with long polling until Ctrl+C.
    pub async fn start_polling(&self) -> Result<()> {
        info!("Starting Telegram bot in polling mode...");

        self.state.restore_snapshot().await;

        if let Some(every) = self.state.snapshot_interval() {
            let snapshot_state = Arc::clone(&self.state);
            tokio::spawn(async move {
                snapshot_loop(snapshot_state, every).await;
            });
        }

        let bot = self.bot.clone();
        let state_for_commands = Arc::clone(&self.state);
        let state_for_messages = Arc::clone(&self.state);
        let state_for_documents = Arc::clone(&self.state);
        let state_for_callbacks = Arc::clone(&self.state);

        let handler = dptree::entry()
            .branch(
                Update::filter_callback_query()
                    .endpoint(move |bot: Bot, q: CallbackQuery| {
                        let state = Arc::clone(&state_for_callbacks);
                        async move { handle_callback(bot, q, state).await }
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                        let state = Arc::clone(&state_for_commands);
                        info!(chat_id = %msg.chat.id, "Command matched: {:?}", cmd);
                        async move { handle_command(bot, msg, cmd, state).await }
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| msg.document().is_some())
                    .endpoint(move |bot: Bot, msg: Message| {
                        let state = Arc::clone(&state_for_documents);
                        async move { handle_document(bot, msg, state).await }
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| msg.voice().is_some())
                    .endpoint(|bot: Bot, msg: Message| async move { handle_voice(bot, msg).await }),
            )
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| {
                        msg.text().map(|t| t.starts_with('/')).unwrap_or(false)
                    })
                    .endpoint(|bot: Bot, msg: Message| async move {
                        if let Some(text) = msg.text() {
                            info!(cmd = %text, "Unrecognized command");
                            bot.send_message(
                                msg.chat.id,
                                format!(
                                    "Unknown command: {}\n\nUse /help to see available commands.",
                                    text.split_whitespace().next().unwrap_or(text)
                                ),
                            )
                            .await?;
                        }
                        Ok(())
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| msg.text().is_some())
                    .endpoint(move |bot: Bot, msg: Message| {
                        let state = Arc::clone(&state_for_messages);
                        debug!(chat_id = %msg.chat.id, "Text message received");
                        async move { handle_message(bot, msg, state).await }
                    }),
            );

        info!("Bot is running! Send /start to begin.");

        Dispatcher::builder(bot, handler)
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.kind);
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Dispatcher stopped, writing final snapshot");
        self.state.save_snapshot().await
    }
}

/// Background task that writes the session snapshot every `every`.
async fn snapshot_loop(state: Arc<BotState>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing has changed yet.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = state.save_snapshot().await {
            error!(error = %e, "Failed to write session snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::{ChatRequest, CompletionTransport, Relay, RelayConfig};

    struct Silent;

    #[async_trait::async_trait]
    impl CompletionTransport for Silent {
        async fn complete(&self, _key: &str, _request: &ChatRequest) -> chatrelay_core::Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_with_token_builds_without_env() {
        let relay = Relay::new(&RelayConfig::with_keys(vec!["k".to_string()]), Arc::new(Silent));
        let state = Arc::new(BotState::new(relay, None, 0));
        let bot = ChatBot::with_token("123:abc", state);
        assert!(bot.state.snapshot_interval().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_loop_writes_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let relay = Relay::new(&RelayConfig::with_keys(vec!["k".to_string()]), Arc::new(Silent));
        let state = Arc::new(BotState::new(relay, Some(path.as_path()), 1));
        state.relay.admit(5, None).await;

        let task = tokio::spawn(snapshot_loop(Arc::clone(&state), Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert!(path.exists());
    }
}
