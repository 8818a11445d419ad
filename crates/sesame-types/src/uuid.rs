//! Characteristic UUIDs for Sesame lock accessories.
//!
//! Standard HomeKit characteristics use the Apple base UUID
//! (`xxxxxxxx-0000-1000-8000-0026BB765291`). The history characteristics
//! (open/closed duration, times opened, ...) are the vendor extensions
//! understood by Eve-style history viewers.

use uuid::{Uuid, uuid};

// --- Standard HomeKit Characteristic UUIDs ---

/// Lock mechanism current state.
pub const LOCK_CURRENT_STATE: Uuid = uuid!("0000001d-0000-1000-8000-0026bb765291");

/// Lock mechanism target state.
pub const LOCK_TARGET_STATE: Uuid = uuid!("0000001e-0000-1000-8000-0026bb765291");

/// Battery level percentage.
pub const BATTERY_LEVEL: Uuid = uuid!("00000068-0000-1000-8000-0026bb765291");

/// Battery charging state.
pub const CHARGING_STATE: Uuid = uuid!("0000008f-0000-1000-8000-0026bb765291");

/// Low battery status.
pub const STATUS_LOW_BATTERY: Uuid = uuid!("00000079-0000-1000-8000-0026bb765291");

/// Contact sensor state.
pub const CONTACT_SENSOR_STATE: Uuid = uuid!("0000006a-0000-1000-8000-0026bb765291");

/// Motion detected.
pub const MOTION_DETECTED: Uuid = uuid!("00000022-0000-1000-8000-0026bb765291");

// --- History Extension Characteristic UUIDs ---

/// Seconds between the history log's initial time and the last activation.
pub const LAST_ACTIVATION: Uuid = uuid!("e863f11a-079e-48ff-8f27-9c2605a29f52");

/// Accumulated open duration in seconds since the last reset.
pub const OPEN_DURATION: Uuid = uuid!("e863f118-079e-48ff-8f27-9c2605a29f52");

/// Accumulated closed duration in seconds since the last reset.
pub const CLOSED_DURATION: Uuid = uuid!("e863f119-079e-48ff-8f27-9c2605a29f52");

/// Number of times the lock was opened since the last reset.
pub const TIMES_OPENED: Uuid = uuid!("e863f129-079e-48ff-8f27-9c2605a29f52");

/// Reset baseline in seconds since 2001-01-01.
pub const RESET_TOTAL: Uuid = uuid!("e863f112-079e-48ff-8f27-9c2605a29f52");

/// Motion sensor sensitivity.
pub const SENSITIVITY: Uuid = uuid!("e863f120-079e-48ff-8f27-9c2605a29f52");

/// Motion sensor duration.
pub const DURATION: Uuid = uuid!("e863f12d-079e-48ff-8f27-9c2605a29f52");

// --- Accessory identity ---

/// Namespace used to derive stable accessory UUIDs from lock device ids.
pub const ACCESSORY_NAMESPACE: Uuid = uuid!("6f1c5a3e-4b1d-5c2a-9e7f-3d8b2a1c0e47");
