//! ---
//! carlink_section: "05-external-interfaces"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "REST boundary and combined relay server."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use carlink_common::config::CommandsConfig;
use carlink_hub::{CarHub, Caller};
use carlink_msg::{CarCommand, Group, TelemetrySnapshot};
use carlink_telemetry::TelemetryCache;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::validation::{self, LightsRequest};

/// Body returned by every mutating endpoint and by rejections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiResponse {
    /// Whether the request was accepted.
    pub success: bool,
    /// Human readable outcome.
    pub message: String,
}

impl ApiResponse {
    /// Accepted request.
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Refused request.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Liveness summary of the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `ok` while the server answers.
    pub status: String,
    /// Live persistent connections.
    pub connections: usize,
    /// Members of the device group.
    pub devices: usize,
    /// Members of the frontend group.
    pub frontends: usize,
}

/// Shared state injected into the REST handlers.
pub struct ApiState {
    hub: Arc<CarHub>,
    telemetry: Arc<dyn TelemetryCache>,
    commands: CommandsConfig,
}

impl ApiState {
    /// Bundle the hub, the cache it writes to, and command limits.
    pub fn new(hub: Arc<CarHub>, telemetry: Arc<dyn TelemetryCache>, commands: CommandsConfig) -> Self {
        Self {
            hub,
            telemetry,
            commands,
        }
    }
}

/// REST routes under `/api`.
pub fn rest_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/carcontrol/move", post(post_move))
        .route("/api/carcontrol/lights", post(post_lights))
        .route("/api/carcontrol/horn", post(post_horn))
        .route("/api/telemetry/current", get(get_current_telemetry))
        .route("/api/telemetry/update", post(post_telemetry_update))
        .route("/api/health", get(get_health))
        .with_state(state)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::Malformed(rejection.body_text()))
}

async fn post_move(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<String>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let direction = validation::parse_direction(&json_body(body)?)?;
    let report = state
        .hub
        .dispatch_command(Caller::External, Some(CarCommand::movement(direction.clone())))?;
    info!(direction = %direction, devices = report.attempted, "move command accepted");
    Ok(Json(ApiResponse::accepted(format!("car moving: {direction}"))))
}

async fn post_lights(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<LightsRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let light_state = validation::parse_light_state(&json_body(body)?)?;
    state
        .hub
        .dispatch_command(Caller::External, Some(CarCommand::lights(light_state)))?;
    Ok(Json(ApiResponse::accepted(format!("lights: {light_state}"))))
}

async fn post_horn(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ApiResponse>, ApiError> {
    let requested = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<Option<i64>>(&body)
            .map_err(|err| ApiError::Malformed(err.to_string()))?
    };
    let duration = validation::horn_duration(requested, state.commands.max_horn_duration_ms);
    state
        .hub
        .dispatch_command(Caller::External, Some(CarCommand::horn(Some(duration))))?;
    Ok(Json(ApiResponse::accepted(format!(
        "horn activated for {duration} ms"
    ))))
}

async fn get_current_telemetry(State(state): State<Arc<ApiState>>) -> Response {
    match state.telemetry.latest() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot.as_ref().clone())).into_response(),
        None => ApiError::NotFound("no telemetry data available").into_response(),
    }
}

async fn post_telemetry_update(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<Option<TelemetrySnapshot>>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let snapshot = json_body(body)?.ok_or(ApiError::MissingPayload)?;
    validation::validate_snapshot(&snapshot)?;
    let timestamp = snapshot.timestamp;
    state.hub.publish_telemetry(Caller::External, Some(snapshot))?;
    info!(%timestamp, "telemetry updated through rest");
    Ok(Json(ApiResponse::accepted("telemetry updated")))
}

async fn get_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        connections: state.hub.connection_count(),
        devices: state.hub.group_size(Group::Devices),
        frontends: state.hub.group_size(Group::Frontends),
    })
}
