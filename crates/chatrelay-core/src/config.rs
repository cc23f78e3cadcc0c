//! Configuration for chatrelay.
//!
//! Directories follow a single state root:
//!
//! ```text
//! ~/.chatrelay/
//! ├── config/       # .env.local with secrets
//! └── state/        # sessions.json snapshot
//! ```
//!
//! `CHATRELAY_STATE_DIR` overrides the root. Everything else is read from the
//! environment by [`RelayConfig::from_env`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::TimeDelta;

use crate::cache::{CacheScope, DEFAULT_MAX_ENTRIES, DEFAULT_TTL_SECS};
use crate::client::{ModelSettings, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::error::ConfigError;
use crate::keys::KeySelection;
use crate::rate_limit::{WindowPolicy, DEFAULT_DAILY_LIMIT};
use crate::retry::{AttemptLimit, RetryPolicy};
use crate::session::{
    HistoryLimits, DEFAULT_CONTEXT_TURNS, DEFAULT_MAX_AGE_HOURS, DEFAULT_MAX_TURNS,
};

/// Environment variable for custom state directory.
pub const STATE_DIR_ENV: &str = "CHATRELAY_STATE_DIR";

/// Default state directory name under home.
const DEFAULT_STATE_DIR: &str = ".chatrelay";

const CONFIG_SUBDIR: &str = "config";
const STATE_SUBDIR: &str = "state";

/// Longest accepted history age or cache TTL.
const MAX_RETENTION_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Default upstream request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

static STATE_DIR_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Get the chatrelay state directory.
///
/// 1. `CHATRELAY_STATE_DIR` if set
/// 2. `~/.chatrelay` if a home directory is available
/// 3. `.chatrelay` in the current directory
pub fn state_dir() -> PathBuf {
    STATE_DIR_CACHE
        .get_or_init(|| {
            std::env::var(STATE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    dirs::home_dir()
                        .map(|h| h.join(DEFAULT_STATE_DIR))
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
                })
        })
        .clone()
}

pub fn config_dir() -> PathBuf {
    state_dir().join(CONFIG_SUBDIR)
}

pub fn runtime_state_dir() -> PathBuf {
    state_dir().join(STATE_SUBDIR)
}

/// Secrets file loaded before the working directory's `.env` files.
pub fn env_file() -> PathBuf {
    config_dir().join(".env.local")
}

/// Session snapshot written when snapshots are enabled.
pub fn snapshot_file() -> PathBuf {
    runtime_state_dir().join("sessions.json")
}

/// Ensure the runtime state directory exists.
pub fn ensure_runtime_state_dir() -> std::io::Result<()> {
    let dir = runtime_state_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}

/// Everything the relay pipeline needs, parsed once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_keys: Vec<String>,
    pub key_selection: KeySelection,
    pub base_url: String,
    pub model: ModelSettings,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub daily_limit: u32,
    pub window: WindowPolicy,
    pub admin_username: Option<String>,
    pub admin_ids: HashSet<u64>,
    pub history: HistoryLimits,
    pub cache_ttl: chrono::Duration,
    pub cache_max_entries: usize,
    pub cache_scope: CacheScope,
    pub system_prompt: Option<String>,
    /// Seconds between session snapshots; zero disables them.
    pub snapshot_secs: u64,
}

impl RelayConfig {
    /// Defaults for everything except the keys.
    pub fn with_keys(api_keys: Vec<String>) -> Self {
        Self {
            api_keys,
            key_selection: KeySelection::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: ModelSettings::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            daily_limit: DEFAULT_DAILY_LIMIT,
            window: WindowPolicy::default(),
            admin_username: None,
            admin_ids: HashSet::new(),
            history: HistoryLimits::default(),
            cache_ttl: chrono::Duration::seconds(DEFAULT_TTL_SECS),
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            cache_scope: CacheScope::default(),
            system_prompt: None,
            snapshot_secs: 0,
        }
    }

    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its
    /// value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_keys: Vec<String> = match get("OPENROUTER_API_KEYS") {
            Some(list) => split_list(&list),
            None => get("OPENROUTER_API_KEY").into_iter().collect(),
        };
        if api_keys.is_empty() {
            return Err(ConfigError::NoApiKeys);
        }

        let mut config = Self::with_keys(api_keys);

        if let Some(v) = get("KEY_SELECTION") {
            config.key_selection = parse_with("KEY_SELECTION", &v)?;
        }
        if let Some(v) = get("OPENROUTER_BASE_URL") {
            url::Url::parse(&v).map_err(|e| invalid("OPENROUTER_BASE_URL", &v, e))?;
            config.base_url = v;
        }

        config.model.model = get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        if let Some(v) = get("OPENROUTER_TEMPERATURE") {
            config.model.temperature = Some(parse_with("OPENROUTER_TEMPERATURE", &v)?);
        }
        if let Some(v) = get("OPENROUTER_MAX_TOKENS") {
            config.model.max_tokens = Some(parse_with("OPENROUTER_MAX_TOKENS", &v)?);
        }
        if let Some(v) = get("OPENROUTER_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_with("OPENROUTER_TIMEOUT_SECS", &v)?);
        }

        if let Some(v) = get("RETRY_MAX_ATTEMPTS") {
            let limit: AttemptLimit = parse_with("RETRY_MAX_ATTEMPTS", &v)?;
            config.retry = config.retry.with_max_attempts(limit);
        }
        if let Some(v) = get("RETRY_BACKOFF_MS") {
            let ms: u64 = parse_with("RETRY_BACKOFF_MS", &v)?;
            config.retry = config.retry.with_initial_backoff(Duration::from_millis(ms));
        }

        if let Some(v) = get("DAILY_MESSAGE_LIMIT") {
            config.daily_limit = parse_with("DAILY_MESSAGE_LIMIT", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_WINDOW") {
            config.window = parse_with("RATE_LIMIT_WINDOW", &v)?;
        }
        config.admin_username = get("ADMIN_USERNAME");
        if let Some(v) = get("ADMIN_USER_IDS") {
            config.admin_ids = split_list(&v)
                .iter()
                .map(|id| parse_with("ADMIN_USER_IDS", id))
                .collect::<Result<_, _>>()?;
        }

        let max_turns = match get("HISTORY_MAX_TURNS") {
            Some(v) => parse_with("HISTORY_MAX_TURNS", &v)?,
            None => DEFAULT_MAX_TURNS,
        };
        let context_turns = match get("HISTORY_CONTEXT_TURNS") {
            Some(v) => parse_with("HISTORY_CONTEXT_TURNS", &v)?,
            None => DEFAULT_CONTEXT_TURNS,
        };
        let max_age = match get("HISTORY_MAX_AGE_HOURS") {
            Some(v) => parse_span("HISTORY_MAX_AGE_HOURS", &v, TimeDelta::try_hours)?,
            None => TimeDelta::hours(DEFAULT_MAX_AGE_HOURS),
        };
        config.history = HistoryLimits {
            max_turns,
            context_turns: context_turns.min(max_turns),
            max_age,
        };

        if let Some(v) = get("CACHE_TTL_SECS") {
            config.cache_ttl = parse_span("CACHE_TTL_SECS", &v, TimeDelta::try_seconds)?;
        }
        if let Some(v) = get("CACHE_MAX_ENTRIES") {
            config.cache_max_entries = parse_with("CACHE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = get("CACHE_SCOPE") {
            config.cache_scope = parse_with("CACHE_SCOPE", &v)?;
        }

        config.system_prompt = get("CHATRELAY_SYSTEM_PROMPT");
        if let Some(v) = get("CHATRELAY_SNAPSHOT_SECS") {
            config.snapshot_secs = parse_with("CHATRELAY_SNAPSHOT_SECS", &v)?;
        }

        Ok(config)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a non-negative count of `unit`s into a span no longer than
/// [`MAX_RETENTION_SECS`].
fn parse_span(
    var: &'static str,
    value: &str,
    unit: fn(i64) -> Option<TimeDelta>,
) -> Result<TimeDelta, ConfigError> {
    let count: i64 = parse_with(var, value)?;
    if count < 0 {
        return Err(invalid(var, value, "must not be negative"));
    }
    unit(count)
        .filter(|span| span.num_seconds() <= MAX_RETENTION_SECS)
        .ok_or_else(|| invalid(var, value, "longer than 100 years"))
}

fn parse_with<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.parse::<T>().map_err(|e| invalid(var, value, e))
}
