use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use device_registry::{
    DeviceId, DeviceRegistry, DeviceSnapshot, HeartbeatReport, MetricsHub, Params, RegistryError,
    StatusReport,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub metrics: MetricsHub,
}

impl AppState {
    pub fn new() -> Result<Self, String> {
        let metrics = MetricsHub::new()?;
        let registry = Arc::new(DeviceRegistry::with_metrics(metrics.dev.clone()));
        Ok(Self { registry, metrics })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/api/devices/{device_id}/commands",
            get(poll_command).post(issue_command),
        )
        .route("/api/devices/{device_id}/status", post(push_status))
        .route("/api/devices/{device_id}/heartbeat", post(push_heartbeat))
        .route("/api/devices/{device_id}/state", get(device_state))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IssueCommandRequest {
    #[serde(default)]
    command: Option<Value>,
    #[serde(default)]
    params: Option<Params>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode_text(),
    )
}

async fn issue_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::new(device_id)?;
    let req: IssueCommandRequest = parse_body(&body)?;
    let command = match &req.command {
        Some(Value::String(c)) if !c.is_empty() => c.as_str(),
        _ => return Err(ApiError::bad_request("Invalid or missing command")),
    };

    let pending = state
        .registry
        .issue_command(&device_id, command, req.params)
        .map_err(|e| match e {
            RegistryError::UnknownCommand(_) => ApiError::bad_request("Invalid or missing command"),
            other => other.into(),
        })?;
    Ok(Json(json!({
        "ok": true,
        "command": pending.command,
        "params": pending.params,
    })))
}

async fn poll_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::new(device_id)?;
    let body = match state.registry.consume_pending_command(&device_id) {
        Some(cmd) => json!({ "command": cmd.command, "params": cmd.params }),
        None => json!({ "command": null }),
    };
    Ok(Json(body))
}

async fn push_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::new(device_id)?;
    let mut report: StatusReport = parse_body(&body)?;
    report.data.get_or_insert_with(Params::new);
    state.registry.record_status(&device_id, report)?;
    Ok(Json(json!({ "ok": true })))
}

async fn push_heartbeat(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::new(device_id)?;
    let report: HeartbeatReport = parse_body(&body)?;
    state.registry.record_heartbeat(&device_id, report);
    Ok(Json(json!({ "ok": true })))
}

async fn device_state(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceSnapshot>, ApiError> {
    let device_id = DeviceId::new(device_id)?;
    let snapshot = state.registry.snapshot(&device_id);
    Ok(Json(DeviceSnapshot {
        device_id,
        state: snapshot,
    }))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "rejecting unparsable body");
        ApiError::bad_request("Invalid JSON")
    })
}

pub struct ApiError {
    code: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code, Json(HashMap::from([("error", self.message)]))).into_response()
    }
}
