//! REST API Handlers
//!
//! HTTP binding of the registry: registration, heartbeats, explicit
//! deregistration, filtered lookups and the watch channel upgrade.

use crate::api::ws;
use crate::domain::{Instance, InstanceKey, RegisterRequest};
use crate::error::{Error, Result};
use crate::registry::{LookupFilter, Registry, RegistryStats};
use axum::{
    extract::{rejection::JsonRejection, Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Body of heartbeat and deregister requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKeyRequest {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub id: String,
}

impl From<InstanceKeyRequest> for InstanceKey {
    fn from(request: InstanceKeyRequest) -> Self {
        InstanceKey::new(request.service_name, request.id)
    }
}

/// Plain acknowledgement body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (
            status,
            Json(ApiErrorResponse {
                error: self.code().into(),
                message: self.to_string(),
                details: None,
            }),
        )
            .into_response()
    }
}

/// Malformed or unreadable JSON bodies are caller errors
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::Validation(rejection.body_text()))
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    registry: Arc<Registry>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            registry: self.registry,
        };

        Router::new()
            // Registry endpoints
            .route("/register", post(register))
            .route("/heartbeat", post(heartbeat))
            .route("/deregister", post(deregister))
            .route("/lookup", get(lookup))
            // Watch channel
            .route("/ws", get(ws::watch))
            // Operational endpoints
            .route("/healthz", get(health_check))
            .route("/stats", get(stats))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) registry: Arc<Registry>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Register or re-register an instance
async fn register(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Instance>> {
    let request = json_body(payload)?;
    let stored = state.registry.register(request).await?;
    Ok(Json(stored))
}

/// Refresh an instance's heartbeat
async fn heartbeat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InstanceKeyRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let key: InstanceKey = json_body(payload)?.into();
    state.registry.heartbeat(&key).await?;
    Ok(MessageResponse::new("heartbeat ok"))
}

/// Remove an instance
async fn deregister(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InstanceKeyRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let key: InstanceKey = json_body(payload)?.into();
    state.registry.deregister(&key).await?;
    Ok(MessageResponse::new("deregistered"))
}

/// Alive instances matching the query parameters
async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Instance>>> {
    let filter = LookupFilter::from_params(params);
    let instances = state.registry.lookup(filter).await?;
    Ok(Json(instances))
}

/// Liveness probe
async fn health_check() -> &'static str {
    "ok"
}

/// Instance and subscriber counts
async fn stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.stats())
}
