//! Application state shared across handlers.
//!
//! # Push channel
//!
//! Characteristic updates produced by the lock controllers go through an
//! [`EventDispatcher`] whose buffer is sized by `server.broadcast_buffer`.
//! Subscribers that fall behind lose the oldest events; the controllers never
//! block on a slow WebSocket client.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use sesame_core::{
    AccessoryRegistry, Clock, CommandExecutor, EventDispatcher, LockApi, LockController,
    SystemClock, WebhookReconciler,
};
use sesame_store::Store;

use crate::config::Config;

/// A discovered lock and its accessory.
#[derive(Debug)]
pub struct LockEntry {
    /// The lock's reconciliation state machine.
    pub controller: Arc<LockController>,
    /// Characteristic dispatch for the lock's accessory.
    pub registry: AccessoryRegistry,
}

/// Shared application state.
pub struct AppState {
    /// The data store, shared with the engine's persistence backend.
    pub store: Arc<Mutex<Store>>,
    /// Configuration.
    pub config: Config,
    /// Remote lock-control API.
    pub api: Arc<dyn LockApi>,
    /// Characteristic push channel.
    pub events: Arc<EventDispatcher>,
    /// Per-device command queues shared by every lock.
    pub executor: Arc<CommandExecutor>,
    /// Wall clock used by the controllers.
    pub clock: Arc<dyn Clock>,
    locks: RwLock<BTreeMap<String, Arc<LockEntry>>>,
    reconciler: RwLock<WebhookReconciler>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create new application state with no locks registered yet.
    pub fn new(store: Store, config: Config, api: Arc<dyn LockApi>) -> Arc<Self> {
        Self::with_clock(store, config, api, Arc::new(SystemClock))
    }

    /// Create new application state using `clock` for history timestamps.
    pub fn with_clock(
        store: Store,
        config: Config,
        api: Arc<dyn LockApi>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let events = Arc::new(EventDispatcher::new(config.server.broadcast_buffer.max(1)));
        Arc::new(Self {
            store: Arc::new(Mutex::new(store)),
            config,
            api,
            events,
            executor: Arc::new(CommandExecutor::new()),
            clock,
            locks: RwLock::new(BTreeMap::new()),
            reconciler: RwLock::new(WebhookReconciler::default()),
        })
    }

    /// Register a lock, making it reachable by the API and the webhook.
    pub async fn register(&self, controller: Arc<LockController>) {
        let device_id = controller.device().device_id.clone();
        let registry = AccessoryRegistry::for_controller(&controller);
        self.reconciler.write().await.insert(Arc::clone(&controller));
        self.locks.write().await.insert(
            device_id,
            Arc::new(LockEntry {
                controller,
                registry,
            }),
        );
    }

    /// Look up a registered lock.
    pub async fn lock(&self, device_id: &str) -> Option<Arc<LockEntry>> {
        self.locks.read().await.get(device_id).cloned()
    }

    /// All registered locks, ordered by device id.
    pub async fn locks(&self) -> Vec<Arc<LockEntry>> {
        self.locks.read().await.values().cloned().collect()
    }

    /// The webhook router over every registered lock.
    pub async fn reconciler(&self) -> WebhookReconciler {
        self.reconciler.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sesame_core::mock::{MockHarness, MockLockApi};
    use sesame_core::{ControllerConfig, LockDevice};

    fn state() -> Arc<AppState> {
        let api: Arc<dyn LockApi> = Arc::new(MockLockApi::new());
        AppState::new(Store::open_in_memory().unwrap(), Config::default(), api)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let state = state();
        assert!(state.locks().await.is_empty());
        assert!(state.reconciler().await.is_empty());

        let harness = MockHarness::new();
        let controller = harness.controller(MockHarness::device(), ControllerConfig::default());
        state.register(controller).await;

        let entry = state.lock("dev-1").await.unwrap();
        assert_eq!(entry.registry.info().name, "Front Door");
        assert_eq!(state.locks().await.len(), 1);
        assert_eq!(state.reconciler().await.len(), 1);
        assert!(state.lock("other").await.is_none());
    }

    #[tokio::test]
    async fn test_locks_are_ordered_by_device_id() {
        let state = state();
        let harness = MockHarness::new();
        for id in ["b", "a", "c"] {
            let device = LockDevice::new(id, id.to_uppercase(), "");
            state
                .register(harness.controller(device, ControllerConfig::default()))
                .await;
        }

        let ids: Vec<_> = state
            .locks()
            .await
            .iter()
            .map(|e| e.controller.device().device_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
