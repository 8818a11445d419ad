//! Webhook receiver and HTTP accessory API for Sesame smart locks.
//!
//! This crate provides a service that:
//! - Discovers every lock on the account at startup
//! - Keeps each lock's accessory state reconciled with the Sesame cloud
//! - Receives the cloud's webhook for out-of-band lock changes
//! - Exposes the accessory characteristics over a REST API
//! - Streams characteristic pushes over WebSocket
//!
//! # Endpoints
//!
//! - `POST /` - Sesame webhook (`{"device_id": "...", "locked": true}`)
//! - `GET /api/health` - Service health check
//! - `GET /api/locks` - All locks with their reconciled state
//! - `GET /api/locks/{id}` - One lock
//! - `GET /api/locks/{id}/characteristics` - Every characteristic value
//! - `GET|PUT /api/locks/{id}/characteristics/{name}` - Read or write one characteristic
//! - `GET /api/locks/{id}/history` - History log entries
//! - `WS /api/ws` - Characteristic push stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/sesame/server.toml`:
//!
//! ```toml
//! debug = false
//!
//! [server]
//! bind = "0.0.0.0:33892"
//!
//! [api]
//! token = "your-sesame-api-token"
//!
//! [reconcile]
//! cooldown_ms = 1000
//! low_battery_threshold = 20
//! history_kind = "door"   # or "motion"
//! ```

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod backend;
pub mod config;
pub mod platform;
pub mod state;
pub mod webhook;
pub mod ws;

pub use backend::SqliteBackend;
pub use config::{
    ApiConfig, Config, ConfigError, ReconcileConfig, ServerConfig, StorageConfig,
    ValidationError,
};
pub use state::{AppState, LockEntry};

/// Build the full application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(webhook::router())
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
