//! Accessory characteristics exposed for each lock.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// `LockCurrentState` / `LockTargetState` value for an unlocked lock.
pub const LOCK_UNSECURED: u32 = 0;
/// `LockCurrentState` / `LockTargetState` value for a locked lock.
pub const LOCK_SECURED: u32 = 1;
/// `ContactSensorState` value when contact is detected (locked).
pub const CONTACT_DETECTED: u32 = 0;
/// `ContactSensorState` value when contact is not detected (unlocked).
pub const CONTACT_NOT_DETECTED: u32 = 1;
/// `StatusLowBattery` normal level.
pub const BATTERY_LEVEL_NORMAL: u32 = 0;
/// `StatusLowBattery` low level.
pub const BATTERY_LEVEL_LOW: u32 = 1;
/// `ChargingState` value for a battery that is not charging.
pub const NOT_CHARGING: u32 = 0;
/// Fixed `Sensitivity` reported by the motion presentation.
pub const MOTION_SENSITIVITY: u32 = 4;
/// Fixed `Duration` reported by the motion presentation.
pub const MOTION_DURATION: u32 = 5;

/// Convert a lock state to its characteristic value.
#[must_use]
pub fn lock_state_value(locked: bool) -> u32 {
    if locked { LOCK_SECURED } else { LOCK_UNSECURED }
}

/// Convert a lock state to its contact sensor value.
#[must_use]
pub fn contact_state_value(locked: bool) -> u32 {
    if locked {
        CONTACT_DETECTED
    } else {
        CONTACT_NOT_DETECTED
    }
}

/// A characteristic of a lock accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Characteristic {
    LockCurrentState,
    LockTargetState,
    BatteryLevel,
    ChargingState,
    StatusLowBattery,
    ContactSensorState,
    MotionDetected,
    LastActivation,
    OpenDuration,
    ClosedDuration,
    TimesOpened,
    ResetTotal,
    Sensitivity,
    Duration,
}

impl Characteristic {
    /// Every characteristic, in registration order.
    pub const ALL: [Characteristic; 14] = [
        Characteristic::LockCurrentState,
        Characteristic::LockTargetState,
        Characteristic::BatteryLevel,
        Characteristic::ChargingState,
        Characteristic::StatusLowBattery,
        Characteristic::ContactSensorState,
        Characteristic::MotionDetected,
        Characteristic::LastActivation,
        Characteristic::OpenDuration,
        Characteristic::ClosedDuration,
        Characteristic::TimesOpened,
        Characteristic::ResetTotal,
        Characteristic::Sensitivity,
        Characteristic::Duration,
    ];

    /// Characteristic name as used by the accessory framework.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Characteristic::LockCurrentState => "LockCurrentState",
            Characteristic::LockTargetState => "LockTargetState",
            Characteristic::BatteryLevel => "BatteryLevel",
            Characteristic::ChargingState => "ChargingState",
            Characteristic::StatusLowBattery => "StatusLowBattery",
            Characteristic::ContactSensorState => "ContactSensorState",
            Characteristic::MotionDetected => "MotionDetected",
            Characteristic::LastActivation => "LastActivation",
            Characteristic::OpenDuration => "OpenDuration",
            Characteristic::ClosedDuration => "ClosedDuration",
            Characteristic::TimesOpened => "TimesOpened",
            Characteristic::ResetTotal => "ResetTotal",
            Characteristic::Sensitivity => "Sensitivity",
            Characteristic::Duration => "Duration",
        }
    }

    /// Characteristic type UUID.
    #[must_use]
    pub fn uuid(self) -> uuid::Uuid {
        use crate::uuid as ids;

        match self {
            Characteristic::LockCurrentState => ids::LOCK_CURRENT_STATE,
            Characteristic::LockTargetState => ids::LOCK_TARGET_STATE,
            Characteristic::BatteryLevel => ids::BATTERY_LEVEL,
            Characteristic::ChargingState => ids::CHARGING_STATE,
            Characteristic::StatusLowBattery => ids::STATUS_LOW_BATTERY,
            Characteristic::ContactSensorState => ids::CONTACT_SENSOR_STATE,
            Characteristic::MotionDetected => ids::MOTION_DETECTED,
            Characteristic::LastActivation => ids::LAST_ACTIVATION,
            Characteristic::OpenDuration => ids::OPEN_DURATION,
            Characteristic::ClosedDuration => ids::CLOSED_DURATION,
            Characteristic::TimesOpened => ids::TIMES_OPENED,
            Characteristic::ResetTotal => ids::RESET_TOTAL,
            Characteristic::Sensitivity => ids::SENSITIVITY,
            Characteristic::Duration => ids::DURATION,
        }
    }
}

impl FromStr for Characteristic {
    type Err = ParseError;

    /// Parse a characteristic name, ignoring case, `-` and `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        Characteristic::ALL
            .into_iter()
            .find(|c| c.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| ParseError::UnknownCharacteristic(s.to_string()))
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
