//! TTL cache of upstream answers keyed by normalized prompt.
//!
//! A hit skips the upstream call regardless of the user's history, so a
//! follow-up question that happens to match an earlier prompt gets the earlier
//! answer. With [`CacheScope::Prompt`] the same holds across users.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

/// Default entry lifetime.
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// Default bound on stored entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// What a cache key is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheScope {
    /// Prompt text only; identical prompts share an answer across users.
    #[default]
    Prompt,
    /// User id plus prompt text.
    User,
}

impl FromStr for CacheScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prompt" | "global" => Ok(CacheScope::Prompt),
            "user" => Ok(CacheScope::User),
            other => Err(format!("unknown cache scope '{}', expected prompt or user", other)),
        }
    }
}

/// Lower-case, trim and URL-escape a prompt.
pub fn normalize_prompt(prompt: &str) -> String {
    let lowered = prompt.trim().to_lowercase();
    url::form_urlencoded::byte_serialize(lowered.as_bytes()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    scope: CacheScope,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(
            Duration::seconds(DEFAULT_TTL_SECS),
            DEFAULT_MAX_ENTRIES,
            CacheScope::default(),
        )
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize, scope: CacheScope) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
            scope,
        }
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache key for a user's prompt under the configured scope.
    pub fn key_for(&self, user_id: u64, prompt: &str) -> String {
        let normalized = normalize_prompt(prompt);
        match self.scope {
            CacheScope::Prompt => normalized,
            CacheScope::User => format!("{}:{}", user_id, normalized),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at < self.ttl
    }

    /// Fresh answer for `key`; an expired entry is dropped.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<String> {
        let fresh = self.entries.get(key).map(|e| self.is_fresh(e, now))?;
        if fresh {
            self.entries.get(key).map(|e| e.text.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    /// Store an answer, evicting expired entries and then the oldest ones.
    pub fn insert(&mut self, key: String, text: impl Into<String>, now: DateTime<Utc>) {
        if self.max_entries == 0 {
            return;
        }

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.purge_expired(now);
        }
        while self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                text: text.into(),
                created_at: now,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.created_at < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: i64, max: usize, scope: CacheScope) -> ResponseCache {
        ResponseCache::new(Duration::seconds(ttl_secs), max, scope)
    }

    #[test]
    fn test_normalize_prompt() {
        assert_eq!(normalize_prompt("  Hello World  "), "hello+world");
        assert_eq!(normalize_prompt("What's 2+2?"), "what%27s+2%2B2%3F");
        assert_eq!(normalize_prompt("HELLO world"), normalize_prompt("hello WORLD"));
    }

    #[test]
    fn test_fresh_entry_hits() {
        let now = Utc::now();
        let mut cache = cache(3600, 10, CacheScope::Prompt);
        let key = cache.key_for(1, "hi");
        cache.insert(key.clone(), "hello", now);

        assert_eq!(cache.get(&key, now + Duration::minutes(59)), Some("hello".to_string()));
    }

    #[test]
    fn test_expired_entry_misses_and_is_dropped() {
        let now = Utc::now();
        let mut cache = cache(3600, 10, CacheScope::Prompt);
        let key = cache.key_for(1, "hi");
        cache.insert(key.clone(), "hello", now);

        assert_eq!(cache.get(&key, now + Duration::seconds(3600)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_scope_controls_sharing() {
        let prompt_scoped = cache(60, 10, CacheScope::Prompt);
        assert_eq!(prompt_scoped.key_for(1, "Hi"), prompt_scoped.key_for(2, "hi"));

        let user_scoped = cache(60, 10, CacheScope::User);
        assert_ne!(user_scoped.key_for(1, "hi"), user_scoped.key_for(2, "hi"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let now = Utc::now();
        let mut cache = cache(3600, 2, CacheScope::Prompt);
        cache.insert("a".to_string(), "1", now);
        cache.insert("b".to_string(), "2", now + Duration::seconds(1));
        cache.insert("c".to_string(), "3", now + Duration::seconds(2));

        let later = now + Duration::seconds(3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", later), None);
        assert_eq!(cache.get("c", later), Some("3".to_string()));
    }

    #[test]
    fn test_capacity_prefers_expired_victims() {
        let now = Utc::now();
        let mut cache = cache(10, 2, CacheScope::Prompt);
        cache.insert("old".to_string(), "1", now);
        cache.insert("new".to_string(), "2", now + Duration::seconds(9));
        cache.insert("newest".to_string(), "3", now + Duration::seconds(11));

        let later = now + Duration::seconds(12);
        assert_eq!(cache.get("new", later), Some("2".to_string()));
        assert_eq!(cache.get("newest", later), Some("3".to_string()));
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut cache = cache(60, 0, CacheScope::Prompt);
        cache.insert("a".to_string(), "1", Utc::now());
        assert!(cache.is_empty());
    }
}
