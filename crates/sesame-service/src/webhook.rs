//! Webhook receiver for out-of-band lock changes.
//!
//! The cloud posts `{"device_id": "...", "locked": true}` to `/` whenever a
//! lock changes state outside the bridge. The request is always answered with
//! an empty success response; reconciliation continues on the lock's queue.

use std::sync::Arc;

use axum::{Router, body::Bytes, extract::State, http::StatusCode, routing::post};
use serde_json::Value;
use tracing::info;

use sesame_core::WebhookEvent;

use crate::state::AppState;

/// Create the webhook router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(receive))
}

async fn receive(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Some(event) => {
            // Fire and forget: the handle is dropped, the task still runs.
            let _ = state.reconciler().await.on_webhook(event);
        }
        None => info!(
            "Unexpected webhook request body: {}",
            String::from_utf8_lossy(&body)
        ),
    }
    StatusCode::OK
}

/// Decode a webhook payload.
///
/// Returns `None` when the body is not a JSON object with a `device_id`.
/// `locked` is read leniently: booleans as-is, numbers as non-zero, strings as
/// non-empty; anything else (including a missing field) is unlocked.
pub fn decode(body: &[u8]) -> Option<WebhookEvent> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;

    let device_id = match object.get("device_id")? {
        Value::String(id) => id.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };

    Some(WebhookEvent {
        device_id,
        locked: object.get("locked").is_some_and(truthy),
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(device_id: &str, locked: bool) -> Option<WebhookEvent> {
        Some(WebhookEvent {
            device_id: device_id.to_string(),
            locked,
        })
    }

    #[test]
    fn test_decode_boolean_payload() {
        assert_eq!(
            decode(br#"{"device_id": "abc", "locked": true}"#),
            event("abc", true)
        );
        assert_eq!(
            decode(br#"{"device_id": "abc", "locked": false, "extra": 1}"#),
            event("abc", false)
        );
    }

    #[test]
    fn test_decode_lenient_locked() {
        assert_eq!(decode(br#"{"device_id": "abc", "locked": 1}"#), event("abc", true));
        assert_eq!(decode(br#"{"device_id": "abc", "locked": 0}"#), event("abc", false));
        assert_eq!(decode(br#"{"device_id": "abc", "locked": null}"#), event("abc", false));
        assert_eq!(decode(br#"{"device_id": "abc"}"#), event("abc", false));
    }

    #[test]
    fn test_decode_numeric_device_id() {
        assert_eq!(decode(br#"{"device_id": 42, "locked": true}"#), event("42", true));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode(b""), None);
        assert_eq!(decode(b"not json"), None);
        assert_eq!(decode(br#"["abc", true]"#), None);
        assert_eq!(decode(br#"{"locked": true}"#), None);
        assert_eq!(decode(br#"{"device_id": null, "locked": true}"#), None);
    }
}
