//! Persistence for chatrelay.
//!
//! Session history and rate counters can be snapshotted to a single JSON file
//! using atomic file operations (write to temp file, then rename).
//!
//! # Example
//!
//! ```no_run
//! use chatrelay_persistence::SnapshotStore;
//!
//! let store = SnapshotStore::new("/home/user/.chatrelay/state/sessions.json");
//! let sessions = store.load().unwrap();
//! store.save(&sessions).unwrap();
//! ```

pub mod atomic;
pub mod error;
pub mod snapshot;

pub use error::{PersistenceError, Result};
pub use snapshot::{SnapshotStore, SNAPSHOT_VERSION};
