//! REST API endpoints for the sesame-service.
//!
//! The characteristic endpoints are the HTTP stand-in for an accessory
//! framework: reads and writes go through each lock's
//! [`sesame_core::AccessoryRegistry`], with the same caching and
//! reconciliation behavior a HomeKit controller would observe.
//!
//! # Concurrency and Lock Acquisition
//!
//! - **`state.store`** (Mutex): held only for history queries. The engine takes
//!   the same mutex for its own writes, so handlers never hold it across a
//!   characteristic read.
//! - **lock registry** (RwLock): read briefly to look up a lock; the entry is
//!   reference counted and used after the guard is released.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Remote
//! failures surface as 503 only when no cached value could answer the read.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use sesame_core::{AccessoryInfo, Characteristic, LockPhase, LockState};
use sesame_store::{HistoryQuery, StoredHistoryEntry};

use crate::state::{AppState, LockEntry};

/// Default number of history entries returned.
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Maximum number of history entries returned.
pub const MAX_HISTORY_LIMIT: u32 = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/locks", get(list_locks))
        .route("/api/locks/{id}", get(get_lock))
        .route("/api/locks/{id}/characteristics", get(read_all))
        .route(
            "/api/locks/{id}/characteristics/{name}",
            get(read_characteristic).put(write_characteristic),
        )
        .route("/api/locks/{id}/history", get(get_history))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub locks: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        locks: state.locks().await.len(),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// A registered lock with its reconciled state.
#[derive(Debug, Serialize)]
pub struct LockResponse {
    pub device_id: String,
    pub info: AccessoryInfo,
    #[serde(flatten)]
    pub phase: LockPhase,
    pub state: LockState,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// A characteristic exposed by an accessory.
#[derive(Debug, Serialize)]
pub struct CharacteristicDescriptor {
    pub name: Characteristic,
    pub writable: bool,
}

impl LockResponse {
    async fn from_entry(entry: &LockEntry) -> Self {
        let state = entry.controller.snapshot().await;
        Self {
            device_id: entry.controller.device().device_id.clone(),
            info: entry.registry.info().clone(),
            phase: state.phase(),
            state,
            characteristics: entry
                .registry
                .characteristics()
                .map(|name| CharacteristicDescriptor {
                    name,
                    writable: entry.registry.is_writable(name),
                })
                .collect(),
        }
    }
}

async fn list_locks(State(state): State<Arc<AppState>>) -> Json<Vec<LockResponse>> {
    let mut locks = Vec::new();
    for entry in state.locks().await {
        locks.push(LockResponse::from_entry(&entry).await);
    }
    Json(locks)
}

async fn lookup(state: &AppState, id: &str) -> Result<Arc<LockEntry>, AppError> {
    state
        .lock(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Lock not found: {}", id)))
}

async fn get_lock(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LockResponse>, AppError> {
    let entry = lookup(&state, &id).await?;
    Ok(Json(LockResponse::from_entry(&entry).await))
}

/// A characteristic value.
#[derive(Debug, Serialize)]
pub struct CharacteristicValue {
    pub characteristic: Characteristic,
    pub value: u32,
}

/// Body of a characteristic write.
#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub value: u32,
}

fn parse_characteristic(name: &str) -> Result<Characteristic, AppError> {
    name.parse()
        .map_err(|_| AppError::NotFound(format!("Unknown characteristic: {}", name)))
}

/// Read every characteristic of a lock.
///
/// Characteristics that cannot be read right now are left out.
async fn read_all(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BTreeMap<Characteristic, u32>>, AppError> {
    let entry = lookup(&state, &id).await?;
    let mut values = BTreeMap::new();
    for characteristic in entry.registry.characteristics() {
        if let Ok(value) = entry.registry.get(characteristic).await {
            values.insert(characteristic, value);
        }
    }
    Ok(Json(values))
}

async fn read_characteristic(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<CharacteristicValue>, AppError> {
    let entry = lookup(&state, &id).await?;
    let characteristic = parse_characteristic(&name)?;
    let value = entry.registry.get(characteristic).await?;
    Ok(Json(CharacteristicValue {
        characteristic,
        value,
    }))
}

/// Write a characteristic.
///
/// Lock commands are acknowledged as soon as they are queued; poll the lock
/// or subscribe to `/api/ws` to observe them settle.
async fn write_characteristic(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
    Json(request): Json<WriteRequest>,
) -> Result<StatusCode, AppError> {
    let entry = lookup(&state, &id).await?;
    let characteristic = parse_characteristic(&name)?;

    entry.registry.set(characteristic, request.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for history.
#[derive(Debug, Deserialize, Default)]
pub struct HistoryParams {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl HistoryParams {
    /// Validate the query parameters.
    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }
        Ok(())
    }

    /// Effective limit, defaulted and capped.
    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT)
    }
}

/// A page of history entries.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub data: Vec<StoredHistoryEntry>,
    pub count: usize,
    pub offset: u32,
    pub limit: u32,
    pub has_more: bool,
}

/// Get history entries of a lock, newest first.
async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    params.validate()?;
    lookup(&state, &id).await?;

    let limit = params.limit();
    let offset = params.offset.unwrap_or(0);
    // One extra row tells whether there are more
    let mut query = HistoryQuery::new()
        .device(&id)
        .limit(limit + 1)
        .offset(offset);
    if let Some(since) = params.since
        && let Ok(dt) = OffsetDateTime::from_unix_timestamp(since)
    {
        query = query.since(dt);
    }
    if let Some(until) = params.until
        && let Ok(dt) = OffsetDateTime::from_unix_timestamp(until)
    {
        query = query.until(dt);
    }

    let mut data = state.store.lock().await.query_history(&query)?;
    let has_more = data.len() > limit as usize;
    data.truncate(limit as usize);

    Ok(Json(HistoryResponse {
        count: data.len(),
        offset,
        limit,
        has_more,
        data,
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(sesame_store::Error),
    Core(sesame_core::Error),
}

impl From<sesame_store::Error> for AppError {
    fn from(e: sesame_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<sesame_core::Error> for AppError {
    fn from(e: sesame_core::Error) -> Self {
        AppError::Core(e)
    }
}

fn core_status(error: &sesame_core::Error) -> StatusCode {
    use sesame_core::Error;

    match error.root() {
        Error::UnsupportedCharacteristic(_) => StatusCode::NOT_FOUND,
        Error::ReadOnly(_) => StatusCode::METHOD_NOT_ALLOWED,
        Error::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        Error::RemoteUnavailable(_)
        | Error::RemoteBusy { .. }
        | Error::RemoteUnresponsive { .. }
        | Error::Api { .. }
        | Error::Http(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Core(e) => (core_status(&e), e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
