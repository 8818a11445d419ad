//! Platform-agnostic types for Sesame smart lock accessories.
//!
//! This crate provides the data model shared by the reconciliation engine
//! (sesame-core), the persistence layer (sesame-store) and the service.
//!
//! # Features
//!
//! - Lock identity, remote status and command results
//! - The reconciled, persisted [`LockState`] snapshot
//! - Accessory [`Characteristic`]s and their value encodings
//! - History log entries
//!
//! # Example
//!
//! ```
//! use sesame_types::{LockPhase, LockState};
//!
//! let state = LockState::new(1_700_000_000);
//! assert_eq!(state.phase(), LockPhase::Unknown);
//! ```

pub mod characteristic;
pub mod error;
pub mod types;
pub mod uuid;

pub use characteristic::Characteristic;
pub use error::{ParseError, ParseResult};
pub use types::{
    CommandResult, DEFAULT_LOW_BATTERY_THRESHOLD, EPOCH_2001, HistoryEntry, HistoryKind,
    LockDescriptor, LockDevice, LockPhase, LockState, MANUFACTURER, MODEL, RemoteStatus,
    SyncResult,
};
