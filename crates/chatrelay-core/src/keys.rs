//! API key pool with a rotation cursor and per-key counters.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// How the pool picks the next key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeySelection {
    /// Walk the keys in order, wrapping around.
    #[default]
    RoundRobin,
    /// Prefer the key with the fewest attempts so far.
    LeastUsed,
    /// Prefer the key with the fewest failures so far.
    LeastErrored,
}

impl FromStr for KeySelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "round-robin" | "roundrobin" => Ok(KeySelection::RoundRobin),
            "least-used" => Ok(KeySelection::LeastUsed),
            "least-errored" => Ok(KeySelection::LeastErrored),
            other => Err(format!(
                "unknown key selection '{}', expected round-robin, least-used or least-errored",
                other
            )),
        }
    }
}

/// Usage counters for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    /// Attempts made with this key.
    pub uses: u64,
    /// Attempts that returned a response.
    pub successes: u64,
    /// Attempts that failed.
    pub errors: u64,
}

/// A key handed out for one attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct SelectedKey {
    /// Position of the key in the pool (safe to log).
    pub index: usize,
    /// The credential itself.
    pub key: String,
}

impl fmt::Debug for SelectedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedKey")
            .field("index", &self.index)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Ordered set of credentials.
pub struct ApiKeyPool {
    keys: Vec<String>,
    stats: Vec<KeyStats>,
    cursor: usize,
    selection: KeySelection,
}

impl fmt::Debug for ApiKeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyPool")
            .field("keys", &self.keys.len())
            .field("stats", &self.stats)
            .field("cursor", &self.cursor)
            .field("selection", &self.selection)
            .finish()
    }
}

impl ApiKeyPool {
    /// Build a pool, dropping blank entries.
    pub fn new<I, S>(keys: I, selection: KeySelection) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        let stats = vec![KeyStats::default(); keys.len()];

        Self {
            keys,
            stats,
            cursor: 0,
            selection,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn selection(&self) -> KeySelection {
        self.selection
    }

    /// Counters for every key, in pool order.
    pub fn stats(&self) -> &[KeyStats] {
        &self.stats
    }

    /// Pick the key for the next attempt and advance the cursor past it.
    ///
    /// Keys listed in `exclude` are skipped unless every key is excluded.
    /// Ties between candidates are broken in rotation order from the cursor.
    pub fn next_key(&mut self, exclude: &[usize]) -> Option<SelectedKey> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }

        let mut candidates: Vec<usize> = (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .filter(|idx| !exclude.contains(idx))
            .collect();
        if candidates.is_empty() {
            candidates = (0..len).map(|offset| (self.cursor + offset) % len).collect();
        }

        // min_by_key keeps the first minimum, which preserves rotation order.
        let index = match self.selection {
            KeySelection::RoundRobin => candidates[0],
            KeySelection::LeastUsed => *candidates
                .iter()
                .min_by_key(|&&idx| self.stats[idx].uses)?,
            KeySelection::LeastErrored => *candidates
                .iter()
                .min_by_key(|&&idx| self.stats[idx].errors)?,
        };

        self.cursor = (index + 1) % len;
        self.stats[index].uses += 1;

        Some(SelectedKey {
            index,
            key: self.keys[index].clone(),
        })
    }

    pub fn record_success(&mut self, index: usize) {
        if let Some(stats) = self.stats.get_mut(index) {
            stats.successes += 1;
        }
    }

    pub fn record_failure(&mut self, index: usize) {
        if let Some(stats) = self.stats.get_mut(index) {
            stats.errors += 1;
        }
    }
}
