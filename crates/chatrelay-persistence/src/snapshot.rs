//! Session snapshot file.
//!
//! ```text
//! {
//!   "version": 1,
//!   "saved_at": "2024-03-10T09:00:00Z",
//!   "sessions": [ { "user_id": 1, "turns": [...], "request_count": 3, ... } ]
//! }
//! ```

use std::path::{Path, PathBuf};

use chatrelay_core::UserSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atomic::{read_json_if_exists, replace_json};
use crate::error::{PersistenceError, Result};

/// Current snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    saved_at: DateTime<Utc>,
    sessions: Vec<UserSession>,
}

/// Reads and writes the sessions snapshot at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the snapshot with `sessions`.
    pub fn save(&self, sessions: &[UserSession]) -> Result<()> {
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            sessions: sessions.to_vec(),
        };
        replace_json(&self.path, &file)?;
        debug!(path = %self.path.display(), sessions = sessions.len(), "Snapshot saved");
        Ok(())
    }

    /// Sessions from the last snapshot; empty if none was written yet.
    pub fn load(&self) -> Result<Vec<UserSession>> {
        let Some(file) = read_json_if_exists::<SnapshotFile>(&self.path)? else {
            return Ok(Vec::new());
        };
        if file.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: file.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        debug!(saved_at = %file.saved_at, sessions = file.sessions.len(), "Snapshot loaded");
        Ok(file.sessions)
    }
}
