//! SQLite-backed persistence for the reconciliation engine.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use sesame_core::{Error, HistoryEntry, HistoryLog, LockDevice, LockState, Result, StateStore};
use sesame_store::Store;

/// Adapts the shared [`Store`] to the engine's storage traits.
#[derive(Clone)]
pub struct SqliteBackend {
    store: Arc<Mutex<Store>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Wrap a shared store.
    pub fn new(store: Arc<Mutex<Store>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StateStore for SqliteBackend {
    async fn load(&self, device: &LockDevice) -> Result<Option<LockState>> {
        let store = self.store.lock().await;
        store
            .load_state(&device.device_id)
            .map_err(Error::persistence)
    }

    async fn save(&self, device: &LockDevice, state: &LockState) -> Result<()> {
        let store = self.store.lock().await;
        store.save_state(device, state).map_err(Error::persistence)
    }
}

#[async_trait]
impl HistoryLog for SqliteBackend {
    async fn append(&self, device_id: &str, entry: HistoryEntry) -> Result<()> {
        let store = self.store.lock().await;
        store
            .append_history(device_id, &entry)
            .map(|_| ())
            .map_err(Error::persistence)
    }

    async fn initial_time(&self, device_id: &str) -> Result<Option<i64>> {
        let store = self.store.lock().await;
        store
            .history_initial_time(device_id)
            .map_err(Error::persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqliteBackend {
        let store = Store::open_in_memory().unwrap();
        SqliteBackend::new(Arc::new(Mutex::new(store)))
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let backend = backend();
        let device = LockDevice::new("dev-1", "Front Door", "SN-0001");
        assert!(backend.load(&device).await.unwrap().is_none());

        let mut state = LockState::new(1_700_000_000);
        state.current_locked = Some(true);
        state.times_opened = 4;
        backend.save(&device, &state).await.unwrap();

        assert_eq!(backend.load(&device).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_history_initial_time_is_first_entry() {
        let backend = backend();
        assert_eq!(backend.initial_time("dev-1").await.unwrap(), None);

        for time in [1_700_000_100, 1_700_000_050] {
            backend
                .append("dev-1", HistoryEntry { time, status: 0 })
                .await
                .unwrap();
        }

        assert_eq!(
            backend.initial_time("dev-1").await.unwrap(),
            Some(1_700_000_100)
        );
    }
}
