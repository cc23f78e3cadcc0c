//! Daily per-user request limits.
//!
//! Two window policies are supported because the bots this replaces disagreed:
//!
//! - [`WindowPolicy::Rolling`]: the window closes 24 hours after it opened
//! - [`WindowPolicy::Calendar`]: the window closes at the next UTC midnight
//!
//! Privileged users (the admin username or admin ids) are counted but never
//! refused.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::session::UserSession;

/// Default requests per window.
pub const DEFAULT_DAILY_LIMIT: u32 = 10;

/// When a user's request window resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowPolicy {
    #[default]
    Rolling,
    Calendar,
}

impl FromStr for WindowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rolling" | "24h" => Ok(WindowPolicy::Rolling),
            "calendar" | "daily" | "midnight" => Ok(WindowPolicy::Calendar),
            other => Err(format!(
                "unknown window policy '{}', expected rolling or calendar",
                other
            )),
        }
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Counted; `remaining` requests are left in the window.
    Allowed { remaining: u32 },
    /// Admin user; counted but unlimited.
    Privileged,
    /// Over the limit until `resets_at`.
    Refused { resets_at: DateTime<Utc> },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateDecision::Refused { .. })
    }
}

/// Read-only view of a user's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub used: u32,
    /// `None` for privileged users.
    pub limit: Option<u32>,
    pub resets_at: DateTime<Utc>,
}

impl Usage {
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: u32,
    policy: WindowPolicy,
    admin_username: Option<String>,
    admin_ids: HashSet<u64>,
}

impl RateLimiter {
    pub fn new(limit: u32, policy: WindowPolicy) -> Self {
        Self {
            limit,
            policy,
            admin_username: None,
            admin_ids: HashSet::new(),
        }
    }

    /// Set the admin username (a leading `@` is ignored, case-insensitive).
    pub fn with_admin_username(mut self, username: Option<&str>) -> Self {
        self.admin_username = username
            .map(normalize_username)
            .filter(|u| !u.is_empty());
        self
    }

    pub fn with_admin_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.admin_ids = ids.into_iter().collect();
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    pub fn is_privileged(&self, user_id: u64, username: Option<&str>) -> bool {
        if self.admin_ids.contains(&user_id) {
            return true;
        }
        match (&self.admin_username, username) {
            (Some(admin), Some(name)) => *admin == normalize_username(name),
            _ => false,
        }
    }

    /// When a window opened at `start` closes.
    pub fn window_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self.policy {
            WindowPolicy::Rolling => start + Duration::hours(24),
            WindowPolicy::Calendar => {
                let day = start.date_naive();
                day.succ_opt()
                    .unwrap_or(day)
                    .and_time(NaiveTime::MIN)
                    .and_utc()
            }
        }
    }

    /// When the session's current window closes.
    pub fn resets_at(&self, session: &UserSession) -> DateTime<Utc> {
        self.window_end(session.window_start)
    }

    /// Start a fresh window if the current one has closed.
    fn roll_window(&self, session: &mut UserSession, now: DateTime<Utc>) {
        if now >= self.resets_at(session) {
            session.request_count = 0;
            session.window_start = now;
        }
    }

    /// Count a request against the session, refusing it if over the limit.
    pub fn check(
        &self,
        session: &mut UserSession,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> RateDecision {
        self.roll_window(session, now);

        if self.is_privileged(session.user_id, username) {
            session.request_count = session.request_count.saturating_add(1);
            return RateDecision::Privileged;
        }

        if session.request_count >= self.limit {
            return RateDecision::Refused {
                resets_at: self.resets_at(session),
            };
        }

        session.request_count += 1;
        RateDecision::Allowed {
            remaining: self.limit - session.request_count,
        }
    }

    /// Current quota without counting a request.
    pub fn usage(&self, session: &UserSession, username: Option<&str>, now: DateTime<Utc>) -> Usage {
        let limit = (!self.is_privileged(session.user_id, username)).then_some(self.limit);
        let resets_at = self.resets_at(session);

        if now >= resets_at {
            // The window has closed; the next request opens a new one.
            return Usage {
                used: 0,
                limit,
                resets_at: self.window_end(now),
            };
        }

        Usage {
            used: session.request_count,
            limit,
            resets_at,
        }
    }
}

fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}
