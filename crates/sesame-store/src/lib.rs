//! Local persistence for reconciled Sesame lock state.
//!
//! This crate provides SQLite-based storage for the per-lock state snapshot
//! and the append-only history log, so durations, counters and the history
//! start survive restarts.
//!
//! # Example
//!
//! ```no_run
//! use sesame_store::{HistoryQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! for stored in store.list_states()? {
//!     println!("{}: {:?}", stored.nickname, stored.state.current_locked);
//! }
//!
//! let recent = store.query_history(&HistoryQuery::new().device("abc").limit(10))?;
//! # Ok::<(), sesame_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{StoredHistoryEntry, StoredLock, StoredState};
pub use queries::HistoryQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/sesame/state.db`
/// - macOS: `~/Library/Application Support/sesame/state.db`
/// - Windows: `C:\Users\<user>\AppData\Local\sesame\state.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("sesame")
        .join("state.db")
}
