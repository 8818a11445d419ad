//! Reconciliation of out-of-band lock changes pushed by the cloud.
//!
//! The cloud calls a webhook when a lock changes state outside the accessory
//! framework (turned by hand, auto-lock, another app). The transport decodes
//! the payload into a [`WebhookEvent`]; the [`WebhookReconciler`] routes it to
//! the lock's controller, where it runs on the device's serialized queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::controller::LockController;
use crate::error::{Error, parse_busy_seconds};
use crate::executor::TaskHandle;

/// A decoded webhook notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Remote device identifier.
    pub device_id: String,
    /// Lock state reported by the cloud.
    pub locked: bool,
}

/// Routes webhook events to lock controllers.
#[derive(Debug, Default, Clone)]
pub struct WebhookReconciler {
    controllers: HashMap<String, Arc<LockController>>,
}

impl WebhookReconciler {
    /// Create a reconciler for the given controllers.
    pub fn new(controllers: impl IntoIterator<Item = Arc<LockController>>) -> Self {
        Self {
            controllers: controllers
                .into_iter()
                .map(|c| (c.device().device_id.clone(), c))
                .collect(),
        }
    }

    /// Add a controller, replacing any with the same device id.
    pub fn insert(&mut self, controller: Arc<LockController>) {
        self.controllers
            .insert(controller.device().device_id.clone(), controller);
    }

    /// Number of known locks.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether no locks are known.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Handle a webhook event.
    ///
    /// Events for unknown devices are logged and dropped (`None`). Otherwise
    /// the reconciliation is queued on the device and its handle returned.
    pub fn on_webhook(&self, event: WebhookEvent) -> Option<TaskHandle<()>> {
        let Some(controller) = self.controllers.get(&event.device_id) else {
            info!(
                "No lock accessory found from webhook request. Device ID: {}",
                event.device_id
            );
            return None;
        };

        let executor = Arc::clone(&controller.context().executor);
        let task = reconcile(Arc::clone(controller), event.locked);
        Some(executor.run_exclusive(&event.device_id, task))
    }
}

async fn reconcile(controller: Arc<LockController>, locked: bool) {
    let nickname = controller.device().nickname.clone();
    let device_id = controller.device().device_id.clone();
    let ctx = controller.context();
    info!(
        "Set {} to {} from webhook",
        nickname,
        if locked { "locked" } else { "unlocked" }
    );

    let busy = match ctx.api.sync(&device_id).await {
        Ok(result) if result.successful => {
            match ctx.fetcher.fetch(&device_id).await {
                Ok(status) => info!(
                    "{} synced to confirm lock status: {:?}",
                    nickname, status.locked
                ),
                Err(e) => debug!("{} is unable to confirm lock status: {}", nickname, e),
            }
            None
        }
        Ok(result) => {
            let message = result.error.unwrap_or_default();
            error!("{} failed to sync. API responded with: {}", nickname, message);
            parse_busy_seconds(&message)
        }
        Err(e) => {
            error!("{} failed to sync. API responded with: {}", nickname, e);
            e.retry_after()
        }
    };

    if let Some(seconds) = busy
        && seconds > 0
    {
        debug!("{} waits for {} seconds", nickname, seconds);
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }

    let (target, current) = controller.cached_states().await;
    if target == current {
        if target != Some(locked) {
            debug!(
                "{}: webhook moves target lock state to {} from {:?}",
                nickname, locked, target
            );
        }
        controller.set_target(locked).await;
        controller.settle(locked, false).await;
    } else if target == Some(locked) {
        debug!("{}: webhook confirms the pending command", nickname);
        controller.settle(locked, false).await;
    } else {
        error!(
            "{} received inconsistent webhook: {}",
            nickname,
            inconsistency(locked, target, current)
        );
    }
}

/// A webhook state that matches neither a settled lock nor its pending command.
fn inconsistency(locked: bool, target: Option<bool>, current: Option<bool>) -> Error {
    Error::inconsistent(format!(
        "webhook reports {} while target is {:?} and current is {:?}",
        if locked { "locked" } else { "unlocked" },
        target,
        current
    ))
}
