//! Webhook reconciliation tests.

use std::sync::Arc;
use std::time::Duration;

use sesame_core::characteristic::{LOCK_SECURED, LOCK_UNSECURED};
use sesame_core::mock::{MockHarness, MockOutcome};
use sesame_core::{
    Characteristic, ControllerConfig, LockController, LockState, WebhookEvent, WebhookReconciler,
};
use tokio::time::Instant;

fn event(device_id: &str, locked: bool) -> WebhookEvent {
    WebhookEvent {
        device_id: device_id.to_string(),
        locked,
    }
}

async fn initialized(harness: &MockHarness) -> (Arc<LockController>, WebhookReconciler) {
    let controller = harness.controller(MockHarness::device(), ControllerConfig::default());
    controller.initialize().await.unwrap();
    let reconciler = WebhookReconciler::new([Arc::clone(&controller)]);
    (controller, reconciler)
}

/// Controller whose stored state has a pending command (target differs from
/// current) that the live status does not resolve.
async fn pending(harness: &MockHarness, target: bool, current: bool) -> Arc<LockController> {
    harness.api.set_status("dev-1", None, true, 80);
    let mut state = LockState::new(MockHarness::START);
    state.current_locked = Some(current);
    state.target_locked = Some(target);
    harness.store.insert("dev-1", state);

    let controller = harness.controller(MockHarness::device(), ControllerConfig::default());
    controller.initialize().await.unwrap();
    controller
}

#[tokio::test(start_paused = true)]
async fn test_out_of_band_change_converges() {
    let harness = MockHarness::new();
    let (controller, reconciler) = initialized(&harness).await;

    harness.clock.advance(30);
    reconciler
        .on_webhook(event("dev-1", false))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let state = controller.snapshot().await;
    assert_eq!(state.target_locked, Some(false));
    assert_eq!(state.current_locked, Some(false));
    assert_eq!(state.times_opened, 1);
    assert_eq!(harness.api.sync_calls(), 1);
    assert_eq!(harness.api.control_calls(), 0);
    assert_eq!(
        harness.sink.values(Characteristic::LockTargetState),
        vec![LOCK_UNSECURED]
    );
    assert_eq!(
        harness.sink.values(Characteristic::LockCurrentState),
        vec![LOCK_UNSECURED]
    );
}

#[tokio::test(start_paused = true)]
async fn test_webhook_confirms_pending_command() {
    let harness = MockHarness::new();
    let controller = pending(&harness, false, true).await;
    let reconciler = WebhookReconciler::new([Arc::clone(&controller)]);

    reconciler
        .on_webhook(event("dev-1", false))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let state = controller.snapshot().await;
    assert_eq!(state.current_locked, Some(false));
    assert_eq!(state.target_locked, Some(false));
    assert!(harness.sink.values(Characteristic::LockTargetState).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inconsistent_webhook_changes_nothing() {
    let harness = MockHarness::new();
    let controller = pending(&harness, false, true).await;
    let reconciler = WebhookReconciler::new([Arc::clone(&controller)]);
    let before = controller.snapshot().await;

    reconciler
        .on_webhook(event("dev-1", true))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let after = controller.snapshot().await;
    assert_eq!(after, before);
    assert!(harness.sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_busy_sync_waits_before_settling() {
    let harness = MockHarness::new();
    let (controller, reconciler) = initialized(&harness).await;
    harness
        .api
        .push_sync_outcome(MockOutcome::Unsuccessful("DEVICE_IS_BUSY 3".to_string()));

    let start = Instant::now();
    reconciler
        .on_webhook(event("dev-1", false))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(controller.snapshot().await.current_locked, Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_busy_error_waits_before_settling() {
    let harness = MockHarness::new();
    let (controller, reconciler) = initialized(&harness).await;
    harness
        .api
        .push_sync_outcome(MockOutcome::Error("DEVICE_IS_BUSY 2".to_string()));

    let start = Instant::now();
    reconciler
        .on_webhook(event("dev-1", false))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(controller.snapshot().await.current_locked, Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_other_sync_failure_does_not_wait() {
    let harness = MockHarness::new();
    let (controller, reconciler) = initialized(&harness).await;
    harness
        .api
        .push_sync_outcome(MockOutcome::Unsuccessful("NO_WIFI".to_string()));

    let start = Instant::now();
    reconciler
        .on_webhook(event("dev-1", false))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.snapshot().await.current_locked, Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_device_is_dropped() {
    let harness = MockHarness::new();
    let (controller, reconciler) = initialized(&harness).await;
    let before = controller.snapshot().await;

    assert!(reconciler.on_webhook(event("other", false)).is_none());

    assert_eq!(controller.snapshot().await, before);
    assert_eq!(harness.api.sync_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_webhook_queues_behind_command() {
    let harness = MockHarness::new();
    let (controller, reconciler) = initialized(&harness).await;

    let command = controller.set_target_lock_state(false);
    let webhook = reconciler.on_webhook(event("dev-1", true)).unwrap();
    command.wait().await.unwrap();
    webhook.wait().await.unwrap();

    // The webhook ran after the unlock settled, so it is an out-of-band relock.
    let state = controller.snapshot().await;
    assert_eq!(state.current_locked, Some(true));
    assert_eq!(state.target_locked, Some(true));
    assert_eq!(
        harness.sink.values(Characteristic::LockCurrentState),
        vec![LOCK_UNSECURED, LOCK_SECURED]
    );
}
