//! Telegram front end for chatrelay.
//!
//! Relays each user's messages, with recent history, to an
//! OpenRouter-compatible chat completions API and sends the answer back.
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN`: Bot token from @BotFather
//! - `OPENROUTER_API_KEYS`: Comma separated keys (or a single `OPENROUTER_API_KEY`)
//!
//! Optional:
//! - `OPENROUTER_MODEL`: Model to use (default: openai/gpt-3.5-turbo)
//! - `DAILY_MESSAGE_LIMIT`: Requests per user per day (default: 10)
//! - `ADMIN_USERNAME`: Username exempt from the daily limit
//! - `CHATRELAY_SNAPSHOT_SECS`: Persist sessions every N seconds (default: off)
//!
//! See [`chatrelay_core::RelayConfig`] for the full list.
//!
//! # Example
//!
//! ```no_run
//! use chatrelay_core::{config, RelayConfig};
//! use chatrelay_telegram::{create_shared_state, ChatBot};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay_config = RelayConfig::from_env()?;
//!     let state = create_shared_state(&relay_config, &config::snapshot_file())?;
//!     ChatBot::new(state)?.start_polling().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Commands
//!
//! - `/start` - Welcome message and reply keyboard
//! - `/help` - Show available commands
//! - `/reset` - Clear conversation history
//! - `/menu` - Inline menu (about, stats)
//! - `/stats` - Usage today

pub mod bot;
pub mod error;
pub mod handlers;
pub mod state;

pub use bot::ChatBot;
pub use error::{Result, TelegramError};
pub use handlers::Command;
pub use state::{create_shared_state, BotState};
