//! WebSocket stream of characteristic pushes.
//!
//! Each client first receives the current lock state of every registered
//! lock as [`CharacteristicEvent`]s, then every push as it happens.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use sesame_core::characteristic::lock_state_value;
use sesame_core::{Characteristic, CharacteristicEvent};

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Current lock state values of every registered lock.
pub async fn snapshot_events(state: &AppState) -> Vec<CharacteristicEvent> {
    let mut events = Vec::new();
    for entry in state.locks().await {
        let device_id = &entry.controller.device().device_id;
        let snapshot = entry.controller.snapshot().await;
        if let Some(locked) = snapshot.current_locked {
            events.push(CharacteristicEvent::new(
                device_id.as_str(),
                Characteristic::LockCurrentState,
                lock_state_value(locked),
            ));
        }
        if let Some(locked) = snapshot.target_locked {
            events.push(CharacteristicEvent::new(
                device_id.as_str(),
                Characteristic::LockTargetState,
                lock_state_value(locked),
            ));
        }
    }
    events
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no push falls in between
    let mut rx = state.events.subscribe();

    info!("WebSocket client connected");

    for event in snapshot_events(&state).await {
        let Ok(json) = serde_json::to_string(&event) else {
            continue;
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            info!("WebSocket client disconnected during initial snapshot");
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    use sesame_core::mock::{MockHarness, MockLockApi};
    use sesame_core::{ControllerConfig, LockApi};
    use sesame_store::Store;

    use crate::config::Config;

    #[tokio::test]
    async fn test_snapshot_skips_unknown_state() {
        let api: Arc<dyn LockApi> = Arc::new(MockLockApi::new());
        let state = AppState::new(Store::open_in_memory().unwrap(), Config::default(), api);
        assert!(snapshot_events(&state).await.is_empty());

        let harness = MockHarness::new();
        let controller = harness.controller(MockHarness::device(), ControllerConfig::default());
        state.register(Arc::clone(&controller)).await;
        assert!(snapshot_events(&state).await.is_empty());

        controller.initialize().await.unwrap();
        let events = snapshot_events(&state).await;
        assert_eq!(
            events,
            vec![
                CharacteristicEvent::new("dev-1", Characteristic::LockCurrentState, 1),
                CharacteristicEvent::new("dev-1", Characteristic::LockTargetState, 1),
            ]
        );
    }
}
