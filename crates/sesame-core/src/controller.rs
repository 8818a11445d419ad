//! Per-lock reconciliation state machine.
//!
//! A [`LockController`] owns the reconciled [`LockState`] of one lock and
//! answers the accessory framework's reads and writes. Reads answer from the
//! cache when they can and reconcile with the cloud in the background; every
//! sequence that mutates the lock state runs on the device's serialized queue
//! (see [`crate::executor`]); status reads coalesce through
//! [`crate::single_flight`].
//!
//! At most one background reconciliation of each lock-state characteristic is
//! queued at a time. Readers arriving while one is queued or running join it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sesame_core::{ControllerConfig, LockContext, LockController};
//!
//! let ctx = LockContext::new(api, store, history, sink);
//! let controller = LockController::new(device, ctx, ControllerConfig::default());
//! controller.initialize().await?;
//!
//! let current = controller.current_lock_state().await?;
//! controller.set_target_lock_state(false);
//! ```

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use sesame_types::characteristic::{
    BATTERY_LEVEL_LOW, BATTERY_LEVEL_NORMAL, MOTION_DURATION, MOTION_SENSITIVITY, NOT_CHARGING,
    contact_state_value, lock_state_value,
};
use sesame_types::{
    Characteristic, DEFAULT_LOW_BATTERY_THRESHOLD, EPOCH_2001, HistoryEntry, HistoryKind,
    LockDevice, LockPhase, LockState, RemoteStatus,
};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::events::{CharacteristicEvent, CharacteristicSink};
use crate::executor::{CommandExecutor, TaskHandle};
use crate::history::{self, relative_seconds};
use crate::single_flight::StatusFetcher;
use crate::traits::{HistoryLog, LockApi, StateStore};

/// Collaborators shared by every lock controller.
#[derive(Clone)]
pub struct LockContext {
    /// Remote lock-control API.
    pub api: Arc<dyn LockApi>,
    /// Coalesced status reads.
    pub fetcher: Arc<StatusFetcher>,
    /// Per-device serialized queues.
    pub executor: Arc<CommandExecutor>,
    /// Snapshot persistence.
    pub store: Arc<dyn StateStore>,
    /// History log.
    pub history: Arc<dyn HistoryLog>,
    /// Characteristic push channel.
    pub sink: Arc<dyn CharacteristicSink>,
    /// Wall clock for history timestamps.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockContext")
            .field("fetcher", &self.fetcher)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl LockContext {
    /// Create a context with the default cool-down, a fresh executor and the
    /// system clock.
    pub fn new(
        api: Arc<dyn LockApi>,
        store: Arc<dyn StateStore>,
        history: Arc<dyn HistoryLog>,
        sink: Arc<dyn CharacteristicSink>,
    ) -> Self {
        Self {
            fetcher: Arc::new(StatusFetcher::with_default_cooldown(Arc::clone(&api))),
            api,
            executor: Arc::new(CommandExecutor::new()),
            store,
            history,
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a different status-read cool-down.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.fetcher = Arc::new(StatusFetcher::new(Arc::clone(&self.api), cooldown));
        self
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Behavior settings of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Battery percentage at or below which the low-battery flag is raised.
    pub low_battery_threshold: u8,
    /// Sensor presentation of the history.
    pub history_kind: HistoryKind,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            history_kind: HistoryKind::Door,
        }
    }
}

type SharedReconcile = Shared<BoxFuture<'static, std::result::Result<bool, Arc<Error>>>>;

/// A queued or running reconciliation.
struct PendingReconcile {
    // Dropped with the task, whether it completes, panics or is discarded.
    alive: Weak<()>,
    result: SharedReconcile,
}

#[derive(Debug, Clone, Copy)]
enum Reconcile {
    Current,
    Target,
}

fn describe(locked: bool) -> &'static str {
    if locked { "locked" } else { "unlocked" }
}

fn progressive(locked: bool) -> &'static str {
    if locked { "locking" } else { "unlocking" }
}

/// Reconciles one lock's accessory state with the cloud.
pub struct LockController {
    device: LockDevice,
    ctx: LockContext,
    config: ControllerConfig,
    state: RwLock<LockState>,
    started_at: i64,
    pending_current: Mutex<Option<PendingReconcile>>,
    pending_target: Mutex<Option<PendingReconcile>>,
    // Held across snapshot and save so saves land in snapshot order.
    save_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for LockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockController")
            .field("device", &self.device)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LockController {
    /// Create a controller with fresh, unknown state.
    ///
    /// Call [`LockController::initialize`] before serving requests.
    pub fn new(device: LockDevice, ctx: LockContext, config: ControllerConfig) -> Arc<Self> {
        let now = ctx.clock.now();
        Arc::new(Self {
            device,
            ctx,
            config,
            state: RwLock::new(LockState::new(now)),
            started_at: now,
            pending_current: Mutex::new(None),
            pending_target: Mutex::new(None),
            save_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The lock this controller manages.
    pub fn device(&self) -> &LockDevice {
        &self.device
    }

    /// The controller's settings.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> LockState {
        self.state.read().await.clone()
    }

    /// The derived lock phase.
    pub async fn phase(&self) -> LockPhase {
        self.state.read().await.phase()
    }

    fn nickname(&self) -> &str {
        &self.device.nickname
    }

    fn device_id(&self) -> &str {
        &self.device.device_id
    }

    // ==================== Lifecycle ====================

    /// Hydrate the state from storage and seed it from one live read.
    ///
    /// Downtime is not accumulated: the observation time restarts at now. One
    /// history entry reflecting the hydrated state is appended.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        self.ctx
            .executor
            .run_exclusive(self.device_id(), async move { this.hydrate().await })
            .wait()
            .await
    }

    async fn hydrate(&self) {
        let now = self.ctx.clock.now();
        let mut state = match self.ctx.store.load(&self.device).await {
            Ok(Some(state)) => {
                debug!("{}: restored persisted state", self.nickname());
                state
            }
            Ok(None) => LockState::new(now),
            Err(e) => {
                warn!("{} is unable to load persisted state: {}", self.nickname(), e);
                LockState::new(now)
            }
        };

        match self.ctx.fetcher.fetch(self.device_id()).await {
            Ok(RemoteStatus {
                locked: Some(locked),
                ..
            }) => {
                state.current_locked = Some(locked);
                state.target_locked = Some(locked);
            }
            Ok(_) => debug!("{}: initial lock state unknown", self.nickname()),
            Err(e) => warn!("{} is unable to read initial lock state: {}", self.nickname(), e),
        }

        state.last_observation = state.last_observation.max(now);
        let entry = HistoryEntry {
            time: now,
            status: self
                .config
                .history_kind
                .sensor_value(state.current_locked.unwrap_or(false)),
        };
        debug!(
            "{}: current {:?}, target {:?}",
            self.nickname(),
            state.current_locked,
            state.target_locked
        );

        *self.state.write().await = state;
        self.append_history(entry).await;
        self.persist().await;
    }

    // ==================== Lock state ====================

    /// Read `LockCurrentState`.
    ///
    /// Answers from the cache when known and reconciles in the background;
    /// otherwise waits for the reconciliation.
    pub async fn current_lock_state(self: &Arc<Self>) -> Result<u32> {
        let cached = self.state.read().await.current_locked;
        self.answer(cached, Reconcile::Current).await
    }

    /// Read `LockTargetState`. Same shape as [`Self::current_lock_state`].
    pub async fn target_lock_state(self: &Arc<Self>) -> Result<u32> {
        let cached = self.state.read().await.target_locked;
        self.answer(cached, Reconcile::Target).await
    }

    async fn answer(self: &Arc<Self>, cached: Option<bool>, kind: Reconcile) -> Result<u32> {
        let pending = self.schedule(kind);
        match cached {
            Some(locked) => Ok(lock_state_value(locked)),
            None => pending
                .await
                .map(lock_state_value)
                .map_err(Error::Shared),
        }
    }

    fn pending_slot(&self, kind: Reconcile) -> &Mutex<Option<PendingReconcile>> {
        match kind {
            Reconcile::Current => &self.pending_current,
            Reconcile::Target => &self.pending_target,
        }
    }

    /// Join the queued reconciliation of `kind`, or queue a new one.
    fn schedule(self: &Arc<Self>, kind: Reconcile) -> SharedReconcile {
        let mut slot = self
            .pending_slot(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = slot.as_ref()
            && pending.alive.strong_count() > 0
        {
            return pending.result.clone();
        }

        let token = Arc::new(());
        let alive = Arc::downgrade(&token);
        let this = Arc::clone(self);
        let handle = self.ctx.executor.run_exclusive(self.device_id(), async move {
            let _token = token;
            match kind {
                Reconcile::Current => this.reconcile_current().await,
                Reconcile::Target => this.reconcile_target().await,
            }
        });
        let result = async move {
            handle
                .wait()
                .await
                .and_then(|result| result)
                .map_err(Arc::new)
        }
        .boxed()
        .shared();
        *slot = Some(PendingReconcile {
            alive,
            result: result.clone(),
        });
        result
    }

    async fn reconcile_current(&self) -> Result<bool> {
        let locked = match self.resolve_status().await {
            Ok(locked) => locked,
            Err(e) => {
                error!(
                    "{} is unable to determine current lock state: {}",
                    self.nickname(),
                    e
                );
                return Err(e);
            }
        };

        let previous = self.state.read().await.current_locked;
        if previous != Some(locked) {
            info!(
                "{}: current lock state updated to {} from {:?}",
                self.nickname(),
                describe(locked),
                previous
            );
        }
        self.push(Characteristic::LockCurrentState, lock_state_value(locked));
        self.record_observation(locked).await;
        self.persist().await;
        Ok(locked)
    }

    async fn reconcile_target(&self) -> Result<bool> {
        let locked = match self.resolve_status().await {
            Ok(locked) => locked,
            Err(e) => {
                error!(
                    "{} is unable to determine target lock state: {}",
                    self.nickname(),
                    e
                );
                return Err(e);
            }
        };

        let previous = {
            let mut state = self.state.write().await;
            state.target_locked.replace(locked)
        };
        if previous != Some(locked) {
            info!(
                "{}: target lock state updated to {} from {:?}",
                self.nickname(),
                describe(locked),
                previous
            );
        }
        self.push(Characteristic::LockTargetState, lock_state_value(locked));
        self.persist().await;
        Ok(locked)
    }

    /// Fetch a trustworthy lock state, forcing one sync if the first read is
    /// unusable.
    async fn resolve_status(&self) -> Result<bool> {
        match self.ctx.fetcher.fetch(self.device_id()).await {
            Ok(status) => {
                if let Some(locked) = status.usable_locked() {
                    return Ok(locked);
                }
            }
            Err(e) => error!("{} is unable to read lock status: {}", self.nickname(), e),
        }

        info!("{} is unresponsive, forcing a status sync...", self.nickname());
        let result = self.ctx.api.sync(self.device_id()).await?;
        if !result.successful {
            let reason = result.error.unwrap_or_else(|| "no reason given".to_string());
            error!(
                "{} failed to sync, please check WiFi connectivity. API responded with: {}",
                self.nickname(),
                reason
            );
            return Err(Error::RemoteUnavailable(reason));
        }

        info!("{} sync successful", self.nickname());
        self.ctx
            .fetcher
            .fetch(self.device_id())
            .await?
            .usable_locked()
            .ok_or_else(|| Error::unresponsive(self.device_id()))
    }

    async fn execute_command(&self, target: bool) {
        let (cached_target, current) = {
            let state = self.state.read().await;
            (state.target_locked, state.current_locked)
        };
        let mut settled = target;

        match (cached_target == Some(target), current == Some(target)) {
            (true, false) => info!("{} is {} now...", self.nickname(), progressive(target)),
            (true, true) => info!("{} is being {}...", self.nickname(), describe(target)),
            (false, true) => {
                let err = Error::inconsistent(format!(
                    "already {} while the target is {:?}",
                    describe(target),
                    cached_target
                ));
                error!(
                    "{} is in an unexpected {} state: {}",
                    self.nickname(),
                    progressive(target),
                    err
                );
            }
            (false, false) => {
                info!("{} is {}...", self.nickname(), progressive(target));
                self.state.write().await.target_locked = Some(target);
                self.push(Characteristic::LockTargetState, lock_state_value(target));
                self.persist().await;

                let failure = match self.ctx.api.control(self.device_id(), target).await {
                    Ok(result) if result.successful => None,
                    Ok(result) => Some(format!(
                        "status:{} successful:{} error:{}",
                        result.status,
                        result.successful,
                        result.error.as_deref().unwrap_or("none")
                    )),
                    Err(e) => Some(e.to_string()),
                };

                if let Some(reason) = failure {
                    error!(
                        "{} possibly failed to {}. {}",
                        self.nickname(),
                        if target { "lock" } else { "unlock" },
                        reason
                    );
                    if let Some(synced) = self.resync_after_failed_control().await {
                        settled = synced;
                    }
                }
            }
        }

        self.settle(settled, settled != target).await;
    }

    /// Sync after a failed command; returns the synced state when usable.
    async fn resync_after_failed_control(&self) -> Option<bool> {
        let result = match self.ctx.api.sync(self.device_id()).await {
            Ok(result) => result,
            Err(e) => {
                error!("{} is unable to sync: {}", self.nickname(), e);
                return None;
            }
        };
        if !result.successful {
            error!(
                "{} failed to sync, please check WiFi connectivity. API responded with: {}",
                self.nickname(),
                result.error.as_deref().unwrap_or("no reason given")
            );
            return None;
        }

        info!("{} sync successful", self.nickname());
        match self.ctx.fetcher.fetch(self.device_id()).await {
            Ok(status) => {
                info!("{} synced to {:?}", self.nickname(), status.locked);
                status.usable_locked()
            }
            Err(e) => {
                error!("{} is unable to read synced status: {}", self.nickname(), e);
                None
            }
        }
    }

    /// Commit `locked` as the current state: push, history, persist.
    ///
    /// With `adopt_target`, the target is moved to `locked` first.
    pub(crate) async fn settle(&self, locked: bool, adopt_target: bool) {
        if adopt_target {
            warn!(
                "{}: adopting synced state {} as target",
                self.nickname(),
                describe(locked)
            );
            self.state.write().await.target_locked = Some(locked);
            self.push(Characteristic::LockTargetState, lock_state_value(locked));
        }
        self.push(Characteristic::LockCurrentState, lock_state_value(locked));
        self.record_observation(locked).await;
        self.persist().await;
        info!("{} is {}", self.nickname(), describe(locked));
    }

    // ==================== Battery ====================

    /// Read `BatteryLevel`.
    pub async fn battery_level(self: &Arc<Self>) -> Result<u32> {
        let cached = self.state.read().await.battery_level;
        match cached {
            Some(level) => {
                self.spawn_battery_refresh();
                Ok(u32::from(level))
            }
            None => {
                let status = self.ctx.fetcher.fetch(self.device_id()).await?;
                self.apply_battery(&status).await;
                Ok(u32::from(status.battery))
            }
        }
    }

    /// Read `StatusLowBattery`.
    pub async fn low_battery_status(self: &Arc<Self>) -> Result<u32> {
        let cached = self.state.read().await.low_battery;
        let low = match cached {
            Some(low) => {
                self.spawn_battery_refresh();
                low
            }
            None => {
                let status = self.ctx.fetcher.fetch(self.device_id()).await?;
                self.apply_battery(&status).await;
                status.is_low_battery(self.config.low_battery_threshold)
            }
        };
        Ok(if low {
            BATTERY_LEVEL_LOW
        } else {
            BATTERY_LEVEL_NORMAL
        })
    }

    /// Read `ChargingState`. Sesame batteries never charge in place.
    pub fn charging_state(&self) -> u32 {
        NOT_CHARGING
    }

    fn spawn_battery_refresh(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.ctx.fetcher.fetch(this.device_id()).await {
                Ok(status) => this.apply_battery(&status).await,
                Err(e) => debug!("{} is unable to refresh battery: {}", this.nickname(), e),
            }
        });
    }

    /// Store battery values, pushing those that changed since a previous answer.
    async fn apply_battery(&self, status: &RemoteStatus) {
        let low = status.is_low_battery(self.config.low_battery_threshold);
        let (previous_level, previous_low) = {
            let mut state = self.state.write().await;
            let previous = (state.battery_level, state.low_battery);
            state.battery_level = Some(status.battery);
            state.low_battery = Some(low);
            previous
        };

        let mut changed = previous_level.is_none() || previous_low.is_none();
        if let Some(level) = previous_level
            && level != status.battery
        {
            self.push(Characteristic::BatteryLevel, u32::from(status.battery));
            changed = true;
        }
        if let Some(was_low) = previous_low
            && was_low != low
        {
            if low {
                warn!("{} battery is low ({}%)", self.nickname(), status.battery);
            }
            self.push(
                Characteristic::StatusLowBattery,
                if low {
                    BATTERY_LEVEL_LOW
                } else {
                    BATTERY_LEVEL_NORMAL
                },
            );
            changed = true;
        }
        if changed {
            self.persist().await;
        }
    }

    // ==================== History presentation ====================

    /// Read `ContactSensorState`.
    pub async fn contact_sensor_state(&self) -> u32 {
        contact_state_value(self.state.read().await.current_locked.unwrap_or(false))
    }

    /// Read `MotionDetected`.
    pub async fn motion_detected(&self) -> u32 {
        u32::from(self.state.read().await.current_locked == Some(true))
    }

    /// Read `LastActivation`, relative to the start of the history log.
    pub async fn last_activation(&self) -> u32 {
        let last_activation = self.state.read().await.last_activation;
        match last_activation {
            Some(time) => relative_seconds(time, self.initial_time().await),
            None => 0,
        }
    }

    /// Read `OpenDuration`.
    pub async fn open_duration(&self) -> u32 {
        u32::try_from(self.state.read().await.open_duration).unwrap_or(u32::MAX)
    }

    /// Read `ClosedDuration`.
    pub async fn closed_duration(&self) -> u32 {
        u32::try_from(self.state.read().await.closed_duration).unwrap_or(u32::MAX)
    }

    /// Read `TimesOpened`.
    pub async fn times_opened(&self) -> u32 {
        self.state.read().await.times_opened
    }

    /// Read `ResetTotal`: the stored baseline, or the history log start in
    /// seconds since 2001-01-01.
    pub async fn reset_total(&self) -> u32 {
        let baseline = self.state.read().await.reset_baseline;
        match baseline {
            Some(baseline) => baseline,
            None => relative_seconds(self.initial_time().await, EPOCH_2001),
        }
    }

    /// Write `ResetTotal`.
    pub async fn reset_totals(self: &Arc<Self>, baseline: u32) -> Result<()> {
        info!("Set ResetTotal {}: {}", self.nickname(), baseline);
        let this = Arc::clone(self);
        self.ctx
            .executor
            .run_exclusive(self.device_id(), async move {
                let push = history::reset_totals(&mut *this.state.write().await, baseline);
                if let Some((characteristic, value)) = push {
                    this.push(characteristic, value);
                    this.persist().await;
                }
            })
            .wait()
            .await
    }

    /// Read `Sensitivity` of the motion presentation.
    pub fn sensitivity(&self) -> u32 {
        MOTION_SENSITIVITY
    }

    /// Read `Duration` of the motion presentation.
    pub fn duration(&self) -> u32 {
        MOTION_DURATION
    }

    // ==================== Internals ====================

    pub(crate) fn context(&self) -> &LockContext {
        &self.ctx
    }

    pub(crate) async fn cached_states(&self) -> (Option<bool>, Option<bool>) {
        let state = self.state.read().await;
        (state.target_locked, state.current_locked)
    }

    pub(crate) async fn set_target(&self, locked: bool) {
        self.state.write().await.target_locked = Some(locked);
        self.push(Characteristic::LockTargetState, lock_state_value(locked));
    }

    pub(crate) fn push(&self, characteristic: Characteristic, value: u32) {
        self.ctx.sink.push(CharacteristicEvent::new(
            self.device_id(),
            characteristic,
            value,
        ));
    }

    async fn initial_time(&self) -> i64 {
        match self.ctx.history.initial_time(self.device_id()).await {
            Ok(Some(time)) => time,
            Ok(None) => self.started_at,
            Err(e) => {
                debug!("{}: history start unavailable: {}", self.nickname(), e);
                self.started_at
            }
        }
    }

    /// Feed one observation to the history accumulator and commit `locked`
    /// as the current state.
    async fn record_observation(&self, locked: bool) {
        let initial_time = self.initial_time().await;
        let now = self.ctx.clock.now();
        let transition = {
            let mut state = self.state.write().await;
            let transition = history::apply_transition(
                &mut state,
                locked,
                now,
                self.config.history_kind,
                initial_time,
            );
            state.current_locked = Some(locked);
            transition
        };

        if transition.edge && !locked {
            debug!("{}: activation recorded", self.nickname());
        }
        for (characteristic, value) in transition.pushes {
            self.push(characteristic, value);
        }
        self.append_history(transition.entry).await;
    }

    async fn append_history(&self, entry: HistoryEntry) {
        if let Err(e) = self.ctx.history.append(self.device_id(), entry).await {
            warn!("{} is unable to record history: {}", self.nickname(), e);
        }
    }

    pub(crate) async fn persist(&self) {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.state.read().await.clone();
        if let Err(e) = self.ctx.store.save(&self.device, &snapshot).await {
            warn!("{} is unable to persist lock state: {}", self.nickname(), e);
        }
    }
}
