//! Operational endpoints: request metrics and runtime mode guidance

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::{Backend, RuntimeMode};
use crate::dispatch::SUPPORTED_EXTENSIONS;
use crate::pool::PoolStats;
use crate::scratch::ScratchStats;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub version: &'static str,
    pub uptime_secs: i64,
    /// Parse requests currently in the handler
    pub active_connections: usize,
    pub total_requests: u64,
    pub max_file_size_mb: u64,
    pub supported_extensions: &'static [&'static str],
    pub pool: PoolStats,
    pub scratch: ScratchStats,
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let requests = state.requests();

    Json(MetricsResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.started_at()).num_seconds(),
        active_connections: requests.active(),
        total_requests: requests.total(),
        max_file_size_mb: state.config().upload.max_file_size / (1024 * 1024),
        supported_extensions: SUPPORTED_EXTENSIONS,
        pool: state.pool().stats(),
        scratch: state.scratch().stats(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSwitchResponse {
    pub current_mode: RuntimeMode,
    pub active_backends: Vec<Backend>,
    pub switch_instructions: Value,
    pub environment_variables: Value,
}

/// How to restart the server in the other runtime mode
pub async fn mode_switch(State(state): State<AppState>) -> Json<ModeSwitchResponse> {
    let registry = state.registry();
    let mode = registry.mode();
    let vlm_backends = RuntimeMode::Vlm.family();

    Json(ModeSwitchResponse {
        current_mode: mode,
        active_backends: registry.active().to_vec(),
        switch_instructions: json!({
            "toPipeline": {
                "command": "PARSE_MODE=pipeline docparse-server",
                "description": "Text-layer and OCR based processing",
                "features": ["formula", "table", "multiple_parse_methods", "ocr_languages"],
            },
            "toVlm": {
                "command": "PARSE_MODE=vlm PARSE_VLM_BACKEND=vlm-sglang-engine docparse-server",
                "description": "Vision-language model processing",
                "features": ["complex_layouts", "generation_parameters"],
                "backends": vlm_backends,
                "note": "May require an accelerator and/or a server URL",
            },
        }),
        environment_variables: json!({
            "PARSE_MODE": {
                "description": "Runtime mode",
                "values": [RuntimeMode::Pipeline, RuntimeMode::Vlm],
                "current": mode,
            },
            "PARSE_VLM_BACKEND": {
                "description": "Active backend in vlm mode",
                "values": vlm_backends,
                "current": (mode == RuntimeMode::Vlm).then(|| registry.default_backend()),
            },
            "PARSE_SERVER_URL": {
                "description": "Server URL for client backends",
                "example": "http://127.0.0.1:30000",
                "current": registry.default_server_url(),
            },
        }),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/mode/switch", get(mode_switch))
}
