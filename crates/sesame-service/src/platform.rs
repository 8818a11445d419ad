//! Lock discovery at startup.
//!
//! Lists every lock on the account, builds one controller and accessory per
//! lock, hydrates it and registers it with the [`AppState`].

use std::sync::Arc;

use tracing::{error, info, warn};

use sesame_core::{
    LockContext, LockController, LockDescriptor, LockDevice, RetryConfig, with_retry,
};

use crate::backend::SqliteBackend;
use crate::state::AppState;

/// Discover locks with the default discovery retry policy.
///
/// Returns the number of locks registered. A listing failure is logged and
/// leaves the service running with no locks.
pub async fn discover(state: &Arc<AppState>) -> usize {
    discover_with(state, &RetryConfig::for_discovery()).await
}

/// Discover locks, retrying the listing according to `retry`.
pub async fn discover_with(state: &Arc<AppState>, retry: &RetryConfig) -> usize {
    let api = Arc::clone(&state.api);
    let locks = match with_retry(retry, "list_locks", || {
        let api = Arc::clone(&api);
        async move { api.list_locks().await }
    })
    .await
    {
        Ok(locks) => locks,
        Err(e) => {
            error!("Unable to retrieve locks: {}", e);
            return 0;
        }
    };

    let count = locks.len();
    for descriptor in locks {
        add_lock(state, descriptor).await;
    }
    count
}

async fn add_lock(state: &Arc<AppState>, descriptor: LockDescriptor) {
    let device = LockDevice::from(descriptor);

    if let Err(e) = state.store.lock().await.upsert_lock(&device) {
        warn!("{} is unable to record lock metadata: {}", device.nickname, e);
    }

    let backend = Arc::new(SqliteBackend::new(Arc::clone(&state.store)));
    let mut ctx = LockContext::new(
        Arc::clone(&state.api),
        backend.clone(),
        backend,
        state.events.clone(),
    )
    .with_cooldown(state.config.reconcile.cooldown())
    .with_clock(Arc::clone(&state.clock));
    ctx.executor = Arc::clone(&state.executor);

    let nickname = device.nickname.clone();
    let controller = LockController::new(device, ctx, state.config.reconcile.controller_config());
    if let Err(e) = controller.initialize().await {
        warn!("{} failed to initialize: {}", nickname, e);
    }
    state.register(controller).await;

    info!("Found {}", nickname);
}
