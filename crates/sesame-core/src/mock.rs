//! Mock collaborators for testing.
//!
//! This module provides in-memory implementations of every trait the engine
//! depends on, so controllers can be exercised without the cloud, a database
//! or an accessory framework.
//!
//! # Features
//!
//! - **Call counting**: every remote operation is counted
//! - **Failure injection**: failing status reads, scripted sync outcomes,
//!   unsuccessful commands, failing saves
//! - **Latency simulation**: artificial delay on status reads
//! - **Manual clock**: deterministic history timestamps
//!
//! # Example
//!
//! ```
//! use sesame_core::mock::MockHarness;
//! use sesame_core::ControllerConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let harness = MockHarness::new();
//!     harness.api.set_status("dev-1", Some(true), true, 80);
//!
//!     let controller = harness.controller(MockHarness::device(), ControllerConfig::default());
//!     controller.initialize().await.unwrap();
//!     assert_eq!(controller.current_lock_state().await.unwrap(), 1);
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use sesame_types::{
    Characteristic, CommandResult, HistoryEntry, LockDescriptor, LockDevice, LockState,
    RemoteStatus, SyncResult,
};

use crate::clock::Clock;
use crate::controller::{ControllerConfig, LockContext, LockController};
use crate::error::{Error, Result};
use crate::events::{CharacteristicEvent, CharacteristicSink};
use crate::traits::{HistoryLog, LockApi, StateStore};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted outcome of a mock command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// The command succeeds.
    Success,
    /// The cloud answers, but reports failure with this message.
    Unsuccessful(String),
    /// The call fails with an API error carrying this message.
    Error(String),
}

#[derive(Debug, Clone, Copy)]
struct MockStatus {
    locked: Option<bool>,
    responsive: bool,
    battery: u8,
}

impl Default for MockStatus {
    fn default() -> Self {
        Self {
            locked: Some(true),
            responsive: true,
            battery: 80,
        }
    }
}

/// A mock Sesame cloud API.
///
/// Unknown devices report locked, responsive, 80% battery.
#[derive(Debug)]
pub struct MockLockApi {
    locks: Mutex<Vec<LockDescriptor>>,
    statuses: Mutex<HashMap<String, MockStatus>>,
    control_outcome: Mutex<MockOutcome>,
    sync_script: Mutex<VecDeque<MockOutcome>>,
    control_requests: Mutex<Vec<(String, bool)>>,
    status_calls: AtomicU32,
    control_calls: AtomicU32,
    sync_calls: AtomicU32,
    list_calls: AtomicU32,
    /// Simulated status read latency in milliseconds (0 = no delay).
    status_latency_ms: AtomicU64,
    status_fails: AtomicBool,
    /// Number of listing calls to fail before succeeding.
    list_failures: AtomicU32,
}

impl Default for MockLockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLockApi {
    /// Create a mock with no locks and default behavior.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            control_outcome: Mutex::new(MockOutcome::Success),
            sync_script: Mutex::new(VecDeque::new()),
            control_requests: Mutex::new(Vec::new()),
            status_calls: AtomicU32::new(0),
            control_calls: AtomicU32::new(0),
            sync_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            status_latency_ms: AtomicU64::new(0),
            status_fails: AtomicBool::new(false),
            list_failures: AtomicU32::new(0),
        }
    }

    /// Add a lock to the account listing.
    #[must_use]
    pub fn with_lock(self, device_id: &str, nickname: &str, serial: &str) -> Self {
        guard(&self.locks).push(LockDescriptor {
            device_id: device_id.to_string(),
            nickname: nickname.to_string(),
            serial: serial.to_string(),
        });
        self
    }

    /// Set the status reported for a device.
    pub fn set_status(&self, device_id: &str, locked: Option<bool>, responsive: bool, battery: u8) {
        guard(&self.statuses).insert(
            device_id.to_string(),
            MockStatus {
                locked,
                responsive,
                battery,
            },
        );
    }

    /// Change only the reported battery level.
    pub fn set_battery(&self, device_id: &str, battery: u8) {
        guard(&self.statuses)
            .entry(device_id.to_string())
            .or_default()
            .battery = battery;
    }

    /// Add latency to status reads.
    pub fn set_status_latency(&self, latency: Duration) {
        self.status_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make status reads fail.
    pub fn set_status_failure(&self, fail: bool) {
        self.status_fails.store(fail, Ordering::Relaxed);
    }

    /// Set the outcome of every following command.
    pub fn set_control_outcome(&self, outcome: MockOutcome) {
        *guard(&self.control_outcome) = outcome;
    }

    /// Queue the outcome of the next sync. Unscripted syncs succeed.
    pub fn push_sync_outcome(&self, outcome: MockOutcome) {
        guard(&self.sync_script).push_back(outcome);
    }

    /// Fail the next `times` listing calls.
    pub fn fail_listing(&self, times: u32) {
        self.list_failures.store(times, Ordering::Relaxed);
    }

    /// Number of status reads.
    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of lock/unlock commands.
    pub fn control_calls(&self) -> u32 {
        self.control_calls.load(Ordering::SeqCst)
    }

    /// Number of syncs.
    pub fn sync_calls(&self) -> u32 {
        self.sync_calls.load(Ordering::SeqCst)
    }

    /// Number of listing calls.
    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Every `(device_id, locked)` command received, in order.
    pub fn control_requests(&self) -> Vec<(String, bool)> {
        guard(&self.control_requests).clone()
    }

    fn api_error(message: &str) -> Error {
        Error::Api {
            status: 400,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl LockApi for MockLockApi {
    async fn get_status(&self, device_id: &str) -> Result<RemoteStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.status_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.status_fails.load(Ordering::Relaxed) {
            return Err(Error::RemoteUnavailable("mock status failure".to_string()));
        }

        let status = guard(&self.statuses)
            .get(device_id)
            .copied()
            .unwrap_or_default();
        Ok(RemoteStatus::new(
            status.locked,
            status.responsive,
            status.battery,
        ))
    }

    async fn control(&self, device_id: &str, locked: bool) -> Result<CommandResult> {
        self.control_calls.fetch_add(1, Ordering::SeqCst);
        guard(&self.control_requests).push((device_id.to_string(), locked));

        let outcome = guard(&self.control_outcome).clone();
        match outcome {
            MockOutcome::Success => {
                let mut statuses = guard(&self.statuses);
                let status = statuses.entry(device_id.to_string()).or_default();
                status.locked = Some(locked);
                status.responsive = true;
                Ok(CommandResult {
                    status: "terminated".to_string(),
                    successful: true,
                    error: None,
                })
            }
            MockOutcome::Unsuccessful(message) => Ok(CommandResult {
                status: "terminated".to_string(),
                successful: false,
                error: Some(message),
            }),
            MockOutcome::Error(message) => Err(Self::api_error(&message)),
        }
    }

    async fn sync(&self, _device_id: &str) -> Result<SyncResult> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = guard(&self.sync_script)
            .pop_front()
            .unwrap_or(MockOutcome::Success);
        match outcome {
            MockOutcome::Success => Ok(SyncResult {
                successful: true,
                error: None,
            }),
            MockOutcome::Unsuccessful(message) => Ok(SyncResult {
                successful: false,
                error: Some(message),
            }),
            MockOutcome::Error(message) => Err(Self::api_error(&message)),
        }
    }

    async fn list_locks(&self) -> Result<Vec<LockDescriptor>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.list_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.list_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(Error::RemoteUnavailable("mock listing failure".to_string()));
        }

        Ok(guard(&self.locks).clone())
    }
}

/// In-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, LockState>>,
    saves: AtomicU32,
    fails: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a snapshot.
    pub fn insert(&self, device_id: &str, state: LockState) {
        guard(&self.states).insert(device_id.to_string(), state);
    }

    /// The saved snapshot of a device.
    pub fn get(&self, device_id: &str) -> Option<LockState> {
        guard(&self.states).get(device_id).cloned()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make loads and saves fail.
    pub fn set_failure(&self, fail: bool) {
        self.fails.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, device: &LockDevice) -> Result<Option<LockState>> {
        if self.fails.load(Ordering::Relaxed) {
            return Err(Error::persistence("mock load failure"));
        }
        Ok(self.get(&device.device_id))
    }

    async fn save(&self, device: &LockDevice, state: &LockState) -> Result<()> {
        if self.fails.load(Ordering::Relaxed) {
            return Err(Error::persistence("mock save failure"));
        }
        self.insert(&device.device_id, state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory [`HistoryLog`].
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl MemoryHistory {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries recorded for a device, oldest first.
    pub fn entries(&self, device_id: &str) -> Vec<HistoryEntry> {
        guard(&self.entries)
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryLog for MemoryHistory {
    async fn append(&self, device_id: &str, entry: HistoryEntry) -> Result<()> {
        guard(&self.entries)
            .entry(device_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn initial_time(&self, device_id: &str) -> Result<Option<i64>> {
        Ok(guard(&self.entries)
            .get(device_id)
            .and_then(|entries| entries.first())
            .map(|entry| entry.time))
    }
}

/// A [`CharacteristicSink`] that records every push.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CharacteristicEvent>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event pushed so far.
    pub fn events(&self) -> Vec<CharacteristicEvent> {
        guard(&self.events).clone()
    }

    /// Values pushed for one characteristic, in order.
    pub fn values(&self, characteristic: Characteristic) -> Vec<u32> {
        guard(&self.events)
            .iter()
            .filter(|e| e.characteristic == characteristic)
            .map(|e| e.value)
            .collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        guard(&self.events).clear();
    }
}

impl CharacteristicSink for RecordingSink {
    fn push(&self, event: CharacteristicEvent) {
        guard(&self.events).push(event);
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `now`.
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Set the current time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock by `seconds` (may be negative).
    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Mocks wired into a [`LockContext`].
#[derive(Debug, Clone)]
pub struct MockHarness {
    /// The mock cloud.
    pub api: Arc<MockLockApi>,
    /// The mock snapshot store.
    pub store: Arc<MemoryStore>,
    /// The mock history log.
    pub history: Arc<MemoryHistory>,
    /// The recording push sink.
    pub sink: Arc<RecordingSink>,
    /// The manual clock, starting at 1 700 000 000.
    pub clock: Arc<ManualClock>,
    /// Context built from the mocks above.
    pub context: LockContext,
}

impl Default for MockHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHarness {
    /// Start time of the manual clock.
    pub const START: i64 = 1_700_000_000;

    /// Create a harness with the default status cool-down.
    pub fn new() -> Self {
        Self::with_api(MockLockApi::new())
    }

    /// Create a harness around a preconfigured mock API.
    pub fn with_api(api: MockLockApi) -> Self {
        let api = Arc::new(api);
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistory::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(Self::START));
        let context = LockContext::new(
            api.clone(),
            store.clone(),
            history.clone(),
            sink.clone(),
        )
        .with_clock(clock.clone());

        Self {
            api,
            store,
            history,
            sink,
            clock,
            context,
        }
    }

    /// Use a different status cool-down.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.context = self.context.with_cooldown(cooldown);
        self
    }

    /// The default test lock: `dev-1`, "Front Door".
    pub fn device() -> LockDevice {
        LockDevice::new("dev-1", "Front Door", "SN-0001")
    }

    /// Create a controller wired to the mocks.
    pub fn controller(&self, device: LockDevice, config: ControllerConfig) -> Arc<LockController> {
        LockController::new(device, self.context.clone(), config)
    }
}
