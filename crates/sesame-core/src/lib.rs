//! Reconciliation engine for Sesame smart locks exposed as HomeKit accessories.
//!
//! This crate keeps a local model of each lock consistent with the Sesame
//! cloud, which is slow, rate-limited, and occasionally unresponsive.
//!
//! # Features
//!
//! - **Coalesced status reads**: concurrent reads of one lock share a single
//!   remote call, with a cool-down between calls
//! - **Serialized commands**: every state-mutating sequence of a lock runs on
//!   that lock's FIFO queue
//! - **Reconciliation**: lock/unlock commands with sync fallback, and
//!   out-of-band changes delivered by webhook
//! - **History**: open/closed durations, open counter and last activation,
//!   presented as a door or motion sensor
//! - **HTTP client** (feature `http-client`): the public Sesame API
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sesame_core::mock::{MemoryHistory, MemoryStore};
//! use sesame_core::{
//!     ControllerConfig, EventDispatcher, LockContext, LockController, LockDevice,
//! };
//!
//! # async fn example(api: Arc<dyn sesame_core::LockApi>) -> sesame_core::Result<()> {
//! let events = Arc::new(EventDispatcher::default());
//! let ctx = LockContext::new(
//!     api,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryHistory::new()),
//!     events.clone(),
//! );
//!
//! let device = LockDevice::new("abc", "Front Door", "SN1");
//! let controller = LockController::new(device, ctx, ControllerConfig::default());
//! controller.initialize().await?;
//!
//! let mut rx = events.subscribe();
//! controller.set_target_lock_state(false);
//! let event = rx.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod accessory;
#[cfg(feature = "http-client")]
pub mod client;
pub mod clock;
pub mod controller;
pub mod error;
pub mod events;
pub mod executor;
pub mod history;
pub mod mock;
pub mod retry;
pub mod single_flight;
pub mod traits;
pub mod webhook;

// Core exports
pub use accessory::{AccessoryInfo, AccessoryRegistry};
pub use clock::{Clock, SystemClock};
pub use controller::{ControllerConfig, LockContext, LockController};
pub use error::{Error, Result, parse_busy_seconds};
pub use events::{
    CharacteristicEvent, CharacteristicSink, EventDispatcher, EventReceiver, EventSender,
};
pub use executor::{CommandExecutor, TaskHandle};
pub use retry::{RetryConfig, with_retry};
pub use single_flight::{DEFAULT_COOLDOWN, SingleFlight, StatusFetcher};
pub use traits::{HistoryLog, LockApi, StateStore};
pub use webhook::{WebhookEvent, WebhookReconciler};

#[cfg(feature = "http-client")]
pub use client::{ClientConfig, SesameClient};

// Re-export from sesame-types
pub use sesame_types::{
    Characteristic, CommandResult, EPOCH_2001, HistoryEntry, HistoryKind, LockDescriptor,
    LockDevice, LockPhase, LockState, RemoteStatus, SyncResult, characteristic,
};
