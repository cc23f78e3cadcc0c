//! Shared state for the Telegram bot.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_core::{Relay, RelayConfig};
use chatrelay_persistence::SnapshotStore;
use tracing::{debug, info, warn};

use crate::error::Result;

/// State handed to every handler.
pub struct BotState {
    pub relay: Relay,
    snapshots: Option<SnapshotStore>,
    snapshot_interval: Option<Duration>,
}

impl BotState {
    /// Wrap a relay; snapshots are written to `snapshot_path` every
    /// `snapshot_secs` seconds when that is non-zero.
    pub fn new(relay: Relay, snapshot_path: Option<&Path>, snapshot_secs: u64) -> Self {
        let enabled = snapshot_secs > 0;
        Self {
            relay,
            snapshots: snapshot_path
                .filter(|_| enabled)
                .map(SnapshotStore::new),
            snapshot_interval: enabled.then(|| Duration::from_secs(snapshot_secs)),
        }
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        self.snapshots.as_ref().and(self.snapshot_interval)
    }

    /// Load the last snapshot into the relay. A broken snapshot is logged and
    /// skipped so the bot still starts.
    pub async fn restore_snapshot(&self) {
        let Some(store) = &self.snapshots else {
            return;
        };
        match store.load() {
            Ok(sessions) if sessions.is_empty() => {
                debug!(path = %store.path().display(), "No session snapshot to restore");
            }
            Ok(sessions) => self.relay.restore(sessions).await,
            Err(e) => {
                warn!(error = %e, path = %store.path().display(), "Ignoring unreadable session snapshot");
            }
        }
    }

    /// Write all sessions to the snapshot file, if snapshots are enabled.
    pub async fn save_snapshot(&self) -> Result<()> {
        let Some(store) = &self.snapshots else {
            return Ok(());
        };
        let sessions = self.relay.snapshot().await;
        store.save(&sessions)?;
        info!(sessions = sessions.len(), "Session snapshot written");
        Ok(())
    }
}

/// Build the relay from `config` and wrap it for the dispatcher.
pub fn create_shared_state(config: &RelayConfig, snapshot_path: &Path) -> Result<Arc<BotState>> {
    let relay = Relay::from_config(config)?;
    Ok(Arc::new(BotState::new(
        relay,
        Some(snapshot_path),
        config.snapshot_secs,
    )))
}
