//! Error types for the Telegram bot.

use thiserror::Error;

/// Errors that stop the bot from starting or shutting down cleanly.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Bot token not provided.
    #[error("Telegram bot token not set. Set TELEGRAM_BOT_TOKEN environment variable.")]
    NoToken,

    /// Failed to start the bot.
    #[error("Failed to start bot: {0}")]
    BotStartFailed(String),

    /// Relay configuration could not be read.
    #[error("Configuration error: {0}")]
    Config(#[from] chatrelay_core::ConfigError),

    /// The completion client could not be built.
    #[error("Relay error: {0}")]
    Relay(#[from] chatrelay_core::CompletionError),

    /// Session snapshot could not be read or written.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] chatrelay_persistence::PersistenceError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for Telegram operations.
pub type Result<T> = std::result::Result<T, TelegramError>;
