//! Core types for Sesame lock state.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Manufacturer reported in the accessory information service.
pub const MANUFACTURER: &str = "CANDY HOUSE";

/// Model reported in the accessory information service.
pub const MODEL: &str = "Sesame";

/// Unix timestamp of 2001-01-01T00:00:00Z, the epoch used by `ResetTotal`.
pub const EPOCH_2001: i64 = 978_307_200;

/// Battery percentage at or below which the low-battery flag is raised.
pub const DEFAULT_LOW_BATTERY_THRESHOLD: u8 = 20;

/// A lock as returned by the remote lock listing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LockDescriptor {
    /// Stable remote device identifier.
    pub device_id: String,
    /// User-assigned display name.
    pub nickname: String,
    /// Hardware serial number.
    #[cfg_attr(feature = "serde", serde(default))]
    pub serial: String,
}

/// A discovered lock device.
///
/// Immutable once discovered. The `device_id` is the primary key for all
/// per-device state; the nickname is display-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LockDevice {
    /// Stable remote device identifier.
    pub device_id: String,
    /// User-assigned display name.
    pub nickname: String,
    /// Hardware serial number.
    pub serial: String,
}

impl LockDevice {
    /// Create a new lock device.
    pub fn new(
        device_id: impl Into<String>,
        nickname: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            nickname: nickname.into(),
            serial: serial.into(),
        }
    }

    /// Stable accessory UUID derived from the device id.
    ///
    /// The same device id always maps to the same UUID, so a renamed lock keeps
    /// its accessory identity.
    #[must_use]
    pub fn accessory_uuid(&self) -> uuid::Uuid {
        uuid::Uuid::new_v5(&crate::uuid::ACCESSORY_NAMESPACE, self.device_id.as_bytes())
    }
}

impl From<LockDescriptor> for LockDevice {
    fn from(d: LockDescriptor) -> Self {
        Self {
            device_id: d.device_id,
            nickname: d.nickname,
            serial: d.serial,
        }
    }
}

impl fmt::Display for LockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nickname)
    }
}

/// Status snapshot reported by the remote API.
///
/// Never persisted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteStatus {
    /// Lock state, `None` if the cloud does not know it.
    pub locked: Option<bool>,
    /// Whether the device answered the cloud recently.
    pub responsive: bool,
    /// Battery percentage (0-100).
    pub battery: u8,
    /// Arrival time of this snapshot.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

impl RemoteStatus {
    /// Create a status stamped with the current time.
    pub fn new(locked: Option<bool>, responsive: bool, battery: u8) -> Self {
        Self {
            locked,
            responsive,
            battery,
            observed_at: OffsetDateTime::now_utc(),
        }
    }

    /// The lock state, if this snapshot can be trusted.
    ///
    /// Returns `None` for unresponsive devices and unknown lock states.
    #[must_use]
    pub fn usable_locked(&self) -> Option<bool> {
        if self.responsive { self.locked } else { None }
    }

    /// Whether the battery is at or below `threshold` percent.
    #[must_use]
    pub fn is_low_battery(&self, threshold: u8) -> bool {
        self.battery <= threshold
    }
}

/// Result of a lock/unlock command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandResult {
    /// Remote task status (`"processing"` or `"terminated"`).
    pub status: String,
    /// Whether the device executed the command.
    pub successful: bool,
    /// Error message reported by the cloud.
    pub error: Option<String>,
}

/// Result of a forced status sync.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncResult {
    /// Whether the sync completed.
    pub successful: bool,
    /// Error message reported by the cloud.
    pub error: Option<String>,
}

/// Reconciled, persisted per-lock state.
///
/// Durations and the open counter only ever grow, except for the explicit
/// reset of `times_opened`. `last_observation` gates every duration update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LockState {
    /// Last observed lock state.
    pub current_locked: Option<bool>,
    /// Last requested or observed target state.
    pub target_locked: Option<bool>,
    /// Last observed battery percentage.
    pub battery_level: Option<u8>,
    /// Last computed low-battery flag.
    pub low_battery: Option<bool>,
    /// Unix time of the last activation (unlock).
    pub last_activation: Option<i64>,
    /// Seconds spent unlocked.
    pub open_duration: u64,
    /// Seconds spent locked.
    pub closed_duration: u64,
    /// Number of unlock edges since the last reset.
    pub times_opened: u32,
    /// Unix time of the last duration accumulation.
    pub last_observation: i64,
    /// Reset baseline in seconds since 2001-01-01.
    pub reset_baseline: Option<u32>,
}

impl LockState {
    /// Fresh state observed from `now`.
    pub fn new(now: i64) -> Self {
        Self {
            last_observation: now,
            ..Default::default()
        }
    }

    /// Derived lock phase.
    #[must_use]
    pub fn phase(&self) -> LockPhase {
        match (self.current_locked, self.target_locked) {
            (None, _) => LockPhase::Unknown,
            (Some(current), Some(target)) if current != target => {
                LockPhase::Transitioning { target }
            }
            (Some(true), _) => LockPhase::Locked,
            (Some(false), _) => LockPhase::Unlocked,
        }
    }
}

/// Reconciliation phase of a lock, derived from its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "phase", rename_all = "snake_case"))]
pub enum LockPhase {
    /// No successful remote read yet.
    Unknown,
    /// Settled locked.
    Locked,
    /// Settled unlocked.
    Unlocked,
    /// A command towards `target` has not been observed to complete.
    Transitioning {
        /// Requested lock state.
        target: bool,
    },
}

impl fmt::Display for LockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockPhase::Unknown => write!(f, "unknown"),
            LockPhase::Locked => write!(f, "locked"),
            LockPhase::Unlocked => write!(f, "unlocked"),
            LockPhase::Transitioning { target: true } => write!(f, "locking"),
            LockPhase::Transitioning { target: false } => write!(f, "unlocking"),
        }
    }
}

/// Sensor flavour used to present lock history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum HistoryKind {
    /// Contact sensor: locked means contact detected.
    #[default]
    Door,
    /// Motion sensor: locked means motion detected.
    Motion,
}

impl HistoryKind {
    /// Sensor value recorded in the history log for a lock state.
    #[must_use]
    pub fn sensor_value(self, locked: bool) -> u8 {
        match self {
            HistoryKind::Door => {
                if locked {
                    0
                } else {
                    1
                }
            }
            HistoryKind::Motion => u8::from(locked),
        }
    }
}

impl FromStr for HistoryKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "door" => Ok(HistoryKind::Door),
            "motion" => Ok(HistoryKind::Motion),
            _ => Err(ParseError::UnknownHistoryKind(s.to_string())),
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryKind::Door => write!(f, "door"),
            HistoryKind::Motion => write!(f, "motion"),
        }
    }
}

/// One entry of the append-only history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryEntry {
    /// Unix timestamp of the observation.
    pub time: i64,
    /// Derived sensor value (see [`HistoryKind::sensor_value`]).
    pub status: u8,
}
