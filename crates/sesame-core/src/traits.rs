//! Trait abstractions for the collaborators of the reconciliation engine.
//!
//! The engine never talks to the network, a database or an accessory
//! framework directly. It goes through these traits so that the HTTP client,
//! the SQLite store and the service's push channel can be swapped for the
//! mocks in [`crate::mock`].

use async_trait::async_trait;

use sesame_types::{
    CommandResult, HistoryEntry, LockDescriptor, LockDevice, LockState, RemoteStatus, SyncResult,
};

use crate::error::Result;

/// Remote lock-control API.
///
/// # Example
///
/// ```ignore
/// use sesame_core::{LockApi, Result};
///
/// async fn print_status<A: LockApi>(api: &A, id: &str) -> Result<()> {
///     let status = api.get_status(id).await?;
///     println!("locked: {:?}, battery: {}%", status.locked, status.battery);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait LockApi: Send + Sync {
    /// Read the cloud's view of a lock.
    async fn get_status(&self, device_id: &str) -> Result<RemoteStatus>;

    /// Ask the lock to lock (`true`) or unlock (`false`).
    async fn control(&self, device_id: &str, locked: bool) -> Result<CommandResult>;

    /// Force the cloud to refresh its view of a lock.
    async fn sync(&self, device_id: &str) -> Result<SyncResult>;

    /// List every lock on the account.
    async fn list_locks(&self) -> Result<Vec<LockDescriptor>>;
}

/// Durable storage of the per-lock state snapshot.
///
/// Writes are best-effort: callers log failures and carry on.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last saved snapshot, `None` if there is none.
    async fn load(&self, device: &LockDevice) -> Result<Option<LockState>>;

    /// Save a snapshot, replacing the previous one.
    async fn save(&self, device: &LockDevice, state: &LockState) -> Result<()>;
}

/// Append-only time-series history of lock observations.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append one entry.
    async fn append(&self, device_id: &str, entry: HistoryEntry) -> Result<()>;

    /// Time of the first entry ever recorded for this device.
    async fn initial_time(&self, device_id: &str) -> Result<Option<i64>>;
}
