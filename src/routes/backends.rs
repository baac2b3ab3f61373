//! Backend metadata endpoints
//!
//! Lists every known backend alongside the active subset so callers can see
//! why a backend id is rejected.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::{
    example_parameters, parameter_guide, Backend, BackendDescriptor, ParameterGuide, RuntimeMode,
};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendsResponse {
    pub runtime_mode: RuntimeMode,
    pub active: Vec<Backend>,
    pub inactive: Vec<Backend>,
    pub all: Vec<Backend>,
    pub pipeline_backends: Vec<Backend>,
    pub vlm_backends: Vec<Backend>,
    /// Descriptors of the active backends
    pub descriptors: Vec<BackendDescriptor>,
    /// Descriptors of every known backend, active or not
    pub all_descriptors: Vec<BackendDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfigResponse {
    pub backend: Backend,
    pub descriptor: BackendDescriptor,
    pub parameters: ParameterGuide,
    pub example: Value,
}

/// List known and active backends
pub async fn list_backends(State(state): State<AppState>) -> Json<BackendsResponse> {
    let registry = state.registry();
    let mode = registry.mode();

    Json(BackendsResponse {
        runtime_mode: mode,
        active: registry.active().to_vec(),
        inactive: registry.inactive(),
        all: Backend::ALL.to_vec(),
        pipeline_backends: RuntimeMode::Pipeline.family(),
        vlm_backends: RuntimeMode::Vlm.family(),
        descriptors: registry.active().iter().map(|b| b.descriptor()).collect(),
        all_descriptors: Backend::ALL.iter().map(|b| b.descriptor()).collect(),
        server_url: match mode {
            RuntimeMode::Vlm => registry.default_server_url().map(String::from),
            RuntimeMode::Pipeline => None,
        },
    })
}

/// Capabilities and parameter guide for one active backend
pub async fn backend_config(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let registry = state.registry();

    let Some(backend) = Backend::from_id(&id) else {
        return AppError::NotFound(format!("Unknown backend '{}'", id)).into_response();
    };

    if !registry.active().contains(&backend) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": format!(
                    "Backend '{}' is not active in {} mode",
                    backend,
                    registry.mode()
                ),
                "code": "INACTIVE_BACKEND",
                "runtimeMode": registry.mode(),
                "activeBackends": registry.active_ids(),
            })),
        )
            .into_response();
    }

    Json(BackendConfigResponse {
        backend,
        descriptor: backend.descriptor(),
        parameters: parameter_guide(backend),
        example: example_parameters(backend),
    })
    .into_response()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_backends))
        .route("/:backend/config", get(backend_config))
}
