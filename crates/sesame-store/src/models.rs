//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use sesame_types::{HistoryEntry, LockDevice, LockState};

/// A lock stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLock {
    /// Remote device identifier.
    pub device_id: String,
    /// Display name at the last discovery.
    pub nickname: String,
    /// Hardware serial number.
    pub serial: String,
    /// First time this lock was discovered.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    /// Last time this lock was discovered or saved.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

impl StoredLock {
    /// Convert to a [`LockDevice`].
    pub fn to_device(&self) -> LockDevice {
        LockDevice::new(&self.device_id, &self.nickname, &self.serial)
    }
}

/// A persisted state snapshot with its lock's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    /// Remote device identifier.
    pub device_id: String,
    /// Display name of the lock.
    pub nickname: String,
    /// The snapshot.
    pub state: LockState,
    /// When the snapshot was written.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A history log entry stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHistoryEntry {
    /// Database row ID.
    pub id: i64,
    /// Remote device identifier.
    pub device_id: String,
    /// When the state was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Sensor value of the observed state.
    pub status: u8,
}

impl StoredHistoryEntry {
    /// Convert to a [`HistoryEntry`].
    pub fn to_entry(&self) -> HistoryEntry {
        HistoryEntry {
            time: self.timestamp.unix_timestamp(),
            status: self.status,
        }
    }
}
