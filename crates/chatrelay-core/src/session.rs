//! Per-user conversation state.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default number of turns kept per user.
pub const DEFAULT_MAX_TURNS: usize = 50;

/// Default number of trailing turns sent upstream as context.
pub const DEFAULT_CONTEXT_TURNS: usize = 10;

/// Default age after which a turn is dropped.
pub const DEFAULT_MAX_AGE_HOURS: i64 = 24;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Bounds applied to every user's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Turns kept; the oldest are evicted first.
    pub max_turns: usize,
    /// Trailing turns sent upstream.
    pub context_turns: usize,
    /// Turns older than this are pruned on the next append.
    pub max_age: Duration,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            context_turns: DEFAULT_CONTEXT_TURNS,
            max_age: Duration::hours(DEFAULT_MAX_AGE_HOURS),
        }
    }
}

/// A user's history plus their rate-limit window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: u64,
    pub turns: VecDeque<Turn>,
    /// Requests counted in the current window.
    pub request_count: u32,
    /// When the current rate-limit window opened.
    pub window_start: DateTime<Utc>,
}

impl UserSession {
    pub fn new(user_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            turns: VecDeque::new(),
            request_count: 0,
            window_start: now,
        }
    }

    /// Append a turn, then prune by age and cap the length.
    pub fn push_turn(
        &mut self,
        role: Role,
        content: impl Into<String>,
        now: DateTime<Utc>,
        limits: &HistoryLimits,
    ) {
        self.turns.push_back(Turn {
            role,
            content: content.into(),
            at: now,
        });
        self.prune(now, limits);
    }

    fn prune(&mut self, now: DateTime<Utc>, limits: &HistoryLimits) {
        if let Some(cutoff) = now.checked_sub_signed(limits.max_age) {
            while self.turns.front().is_some_and(|t| t.at < cutoff) {
                self.turns.pop_front();
            }
        }
        while self.turns.len() > limits.max_turns {
            self.turns.pop_front();
        }
    }

    /// The last `n` turns, oldest first.
    pub fn context(&self, n: usize) -> impl Iterator<Item = &Turn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }

    pub fn clear_history(&mut self) {
        self.turns.clear();
    }
}

/// All sessions, keyed by user id.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<u64, UserSession>,
    limits: HistoryLimits,
}

impl SessionStore {
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            sessions: HashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &HistoryLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, user_id: u64) -> Option<&UserSession> {
        self.sessions.get(&user_id)
    }

    /// Fetch a session, creating it with `now` as its window start.
    pub fn get_or_create(&mut self, user_id: u64, now: DateTime<Utc>) -> &mut UserSession {
        self.sessions
            .entry(user_id)
            .or_insert_with(|| UserSession::new(user_id, now))
    }

    /// Append a turn to a user's history.
    pub fn record(&mut self, user_id: u64, role: Role, content: &str, now: DateTime<Utc>) {
        let limits = self.limits;
        self.get_or_create(user_id, now)
            .push_turn(role, content, now, &limits);
    }

    /// Context turns for the next upstream request.
    pub fn context(&self, user_id: u64) -> Vec<Turn> {
        self.sessions
            .get(&user_id)
            .map(|s| s.context(self.limits.context_turns).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a user's history, keeping their rate-limit window.
    ///
    /// Returns whether there was any history to clear.
    pub fn reset_history(&mut self, user_id: u64) -> bool {
        match self.sessions.get_mut(&user_id) {
            Some(session) if !session.turns.is_empty() => {
                session.clear_history();
                true
            }
            _ => false,
        }
    }

    /// Copy of every session, ordered by user id.
    pub fn snapshot(&self) -> Vec<UserSession> {
        let mut sessions: Vec<UserSession> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.user_id);
        sessions
    }

    /// Replace the store's contents with previously saved sessions.
    pub fn restore(&mut self, sessions: Vec<UserSession>, now: DateTime<Utc>) {
        self.sessions.clear();
        for mut session in sessions {
            session.prune(now, &self.limits);
            self.sessions.insert(session.user_id, session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_turns: usize, context_turns: usize) -> HistoryLimits {
        HistoryLimits {
            max_turns,
            context_turns,
            max_age: Duration::hours(24),
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let now = Utc::now();
        let mut store = SessionStore::new(limits(3, 2));

        for i in 0..5 {
            store.record(7, Role::User, &format!("msg {}", i), now);
        }

        let session = store.get(7).unwrap();
        let contents: Vec<&str> = session.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn test_context_is_trailing_window() {
        let now = Utc::now();
        let mut store = SessionStore::new(limits(50, 2));
        store.record(1, Role::User, "q1", now);
        store.record(1, Role::Assistant, "a1", now);
        store.record(1, Role::User, "q2", now);

        let context = store.context(1);
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "a1");
        assert_eq!(context[1].content, "q2");
        assert!(store.context(99).is_empty());
    }

    #[test]
    fn test_old_turns_pruned_on_append() {
        let now = Utc::now();
        let mut store = SessionStore::new(limits(50, 10));
        store.record(1, Role::User, "yesterday", now - Duration::hours(25));
        store.record(1, Role::User, "today", now);

        let session = store.get(1).unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].content, "today");
    }

    #[test]
    fn test_reset_keeps_rate_window() {
        let now = Utc::now();
        let mut store = SessionStore::new(HistoryLimits::default());
        store.get_or_create(5, now).request_count = 4;
        store.record(5, Role::User, "hello", now);

        assert!(store.reset_history(5));
        assert!(!store.reset_history(5));
        assert!(!store.reset_history(6));

        let session = store.get(5).unwrap();
        assert!(session.turns.is_empty());
        assert_eq!(session.request_count, 4);
    }

    #[test]
    fn test_snapshot_restore() {
        let now = Utc::now();
        let mut store = SessionStore::new(HistoryLimits::default());
        store.record(2, Role::User, "b", now);
        store.record(1, Role::User, "a", now);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.iter().map(|s| s.user_id).collect::<Vec<_>>(), vec![1, 2]);

        let mut restored = SessionStore::new(HistoryLimits::default());
        restored.restore(snapshot, now);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.context(1)[0].content, "a");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
