//! The relay pipeline: rate check, cache lookup, history, upstream call.
//!
//! [`Relay`] owns every piece of shared state the bot mutates. Each structure
//! has its own lock and none is held while the upstream request is in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::cache::ResponseCache;
use crate::client::{ChatMessage, CompletionClient, CompletionTransport, OpenRouterTransport};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::keys::{ApiKeyPool, KeyStats};
use crate::rate_limit::{RateDecision, RateLimiter, Usage};
use crate::session::{HistoryLimits, Role, SessionStore, UserSession};

/// Sent to the user when no upstream attempt succeeded.
pub const FALLBACK_REPLY: &str =
    "Sorry, all API keys are exhausted right now. Please try again later.";

/// A message to relay on behalf of a Telegram user.
#[derive(Debug, Clone)]
pub struct IncomingPrompt {
    pub user_id: u64,
    pub username: Option<String>,
    pub text: String,
}

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Cache,
    Upstream { key_index: usize, attempts: usize },
}

/// Result of relaying one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Reply { text: String, source: ReplySource },
    /// The user is over their daily limit.
    Limited { resets_at: DateTime<Utc> },
    /// Every attempt failed; `reply` is the apology to send.
    Failed { reply: String },
}

impl RelayOutcome {
    /// Text to send back to the chat, if any.
    pub fn reply_text(&self) -> Option<&str> {
        match self {
            RelayOutcome::Reply { text, .. } => Some(text),
            RelayOutcome::Failed { reply } => Some(reply),
            RelayOutcome::Limited { .. } => None,
        }
    }
}

/// Per-user numbers shown by `/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStats {
    pub usage: Usage,
    pub history_len: usize,
}

pub struct Relay {
    client: CompletionClient,
    sessions: RwLock<SessionStore>,
    cache: Mutex<ResponseCache>,
    limiter: RateLimiter,
    system_prompt: Option<String>,
}

impl Relay {
    /// Build the pipeline around an existing transport.
    pub fn new(config: &RelayConfig, transport: Arc<dyn CompletionTransport>) -> Self {
        let keys = ApiKeyPool::new(&config.api_keys, config.key_selection);
        let client = CompletionClient::new(
            transport,
            keys,
            config.retry.clone(),
            config.model.clone(),
        );
        let limiter = RateLimiter::new(config.daily_limit, config.window)
            .with_admin_username(config.admin_username.as_deref())
            .with_admin_ids(config.admin_ids.iter().copied());

        Self {
            client,
            sessions: RwLock::new(SessionStore::new(config.history)),
            cache: Mutex::new(ResponseCache::new(
                config.cache_ttl,
                config.cache_max_entries,
                config.cache_scope,
            )),
            limiter,
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Build the pipeline with the reqwest transport.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let transport = OpenRouterTransport::new(&config.base_url, config.timeout)?;
        info!(
            endpoint = %transport.endpoint(),
            model = %config.model.model,
            keys = config.api_keys.len(),
            "Relay configured"
        );
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn model(&self) -> &str {
        &self.client.settings().model
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn history_limits(&self) -> HistoryLimits {
        *self.sessions.read().await.limits()
    }

    pub async fn key_stats(&self) -> Vec<KeyStats> {
        self.client.key_stats().await
    }

    /// Count a request against the user's quota.
    pub async fn admit(&self, user_id: u64, username: Option<&str>) -> RateDecision {
        self.admit_at(user_id, username, Utc::now()).await
    }

    pub async fn admit_at(
        &self,
        user_id: u64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_or_create(user_id, now);
        let decision = self.limiter.check(session, username, now);
        if !decision.is_allowed() {
            info!(user_id, count = session.request_count, "Daily limit reached");
        }
        decision
    }

    /// Answer `text` for an already admitted user.
    pub async fn respond(&self, user_id: u64, text: &str) -> RelayOutcome {
        self.respond_at(user_id, text, Utc::now()).await
    }

    pub async fn respond_at(&self, user_id: u64, text: &str, now: DateTime<Utc>) -> RelayOutcome {
        let cache_key = {
            let mut cache = self.cache.lock().await;
            let key = cache.key_for(user_id, text);
            if let Some(cached) = cache.get(&key, now) {
                drop(cache);
                debug!(user_id, "Cache hit");
                let mut sessions = self.sessions.write().await;
                sessions.record(user_id, Role::User, text, now);
                sessions.record(user_id, Role::Assistant, &cached, now);
                return RelayOutcome::Reply {
                    text: cached,
                    source: ReplySource::Cache,
                };
            }
            key
        };

        let messages = {
            let mut sessions = self.sessions.write().await;
            sessions.record(user_id, Role::User, text, now);
            let context = sessions.context(user_id);

            let mut messages = Vec::with_capacity(context.len() + 1);
            if let Some(prompt) = &self.system_prompt {
                messages.push(ChatMessage::system(prompt));
            }
            messages.extend(context.iter().map(ChatMessage::from_turn));
            messages
        };

        match self.client.complete(messages).await {
            Ok(completion) => {
                self.sessions
                    .write()
                    .await
                    .record(user_id, Role::Assistant, &completion.text, now);
                self.cache
                    .lock()
                    .await
                    .insert(cache_key, completion.text.clone(), now);

                RelayOutcome::Reply {
                    text: completion.text,
                    source: ReplySource::Upstream {
                        key_index: completion.key_index,
                        attempts: completion.attempts,
                    },
                }
            }
            Err(e) => {
                error!(user_id, error = %e, "Completion failed");
                RelayOutcome::Failed {
                    reply: FALLBACK_REPLY.to_string(),
                }
            }
        }
    }

    /// Admit and answer in one step.
    pub async fn handle(&self, prompt: &IncomingPrompt) -> RelayOutcome {
        self.handle_at(prompt, Utc::now()).await
    }

    pub async fn handle_at(&self, prompt: &IncomingPrompt, now: DateTime<Utc>) -> RelayOutcome {
        match self
            .admit_at(prompt.user_id, prompt.username.as_deref(), now)
            .await
        {
            RateDecision::Refused { resets_at } => RelayOutcome::Limited { resets_at },
            _ => self.respond_at(prompt.user_id, &prompt.text, now).await,
        }
    }

    /// Clear a user's conversation history. Returns whether anything was cleared.
    pub async fn reset_history(&self, user_id: u64) -> bool {
        self.sessions.write().await.reset_history(user_id)
    }

    pub async fn stats(&self, user_id: u64, username: Option<&str>) -> UserStats {
        self.stats_at(user_id, username, Utc::now()).await
    }

    pub async fn stats_at(
        &self,
        user_id: u64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> UserStats {
        let sessions = self.sessions.read().await;
        match sessions.get(user_id) {
            Some(session) => UserStats {
                usage: self.limiter.usage(session, username, now),
                history_len: session.turns.len(),
            },
            None => UserStats {
                usage: self.limiter.usage(&UserSession::new(user_id, now), username, now),
                history_len: 0,
            },
        }
    }

    /// Copy of every session for persistence.
    pub async fn snapshot(&self) -> Vec<UserSession> {
        self.sessions.read().await.snapshot()
    }

    /// Replace all sessions with a saved snapshot.
    pub async fn restore(&self, sessions: Vec<UserSession>) {
        let count = sessions.len();
        self.sessions.write().await.restore(sessions, Utc::now());
        info!(sessions = count, "Sessions restored");
    }
}
