//! chatrelay core - the relay logic behind the Telegram bot.
//!
//! - **client**: OpenRouter-compatible completion transport and the key rotation loop
//! - **keys**: API key pool with selection strategies and per-key counters
//! - **retry**: attempt budget and backoff schedule
//! - **session**: bounded per-user history
//! - **rate_limit**: daily per-user quotas with admin bypass
//! - **cache**: TTL response cache
//! - **relay**: the pipeline tying the above together
//! - **chunk**: splitting replies to Telegram's message size
//! - **config**: environment configuration and state paths

pub mod cache;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod rate_limit;
pub mod relay;
pub mod retry;
pub mod session;

pub use cache::{CacheScope, ResponseCache};
pub use chunk::{split_message, truncate_chars, TELEGRAM_MESSAGE_LIMIT};
pub use client::{
    ChatMessage, ChatRequest, CompletionClient, CompletionTransport, ModelSettings,
    OpenRouterTransport,
};
pub use config::{
    config_dir, ensure_runtime_state_dir, env_file, runtime_state_dir, snapshot_file, state_dir,
    RelayConfig,
};
pub use error::{CompletionError, ConfigError, Result};
pub use keys::{ApiKeyPool, KeySelection, KeyStats};
pub use rate_limit::{RateDecision, RateLimiter, Usage, WindowPolicy};
pub use relay::{IncomingPrompt, Relay, RelayOutcome, ReplySource, UserStats, FALLBACK_REPLY};
pub use retry::{AttemptLimit, RetryPolicy};
pub use session::{HistoryLimits, Role, SessionStore, Turn, UserSession};
