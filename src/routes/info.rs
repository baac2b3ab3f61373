//! Root service description

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::dispatch::SUPPORTED_EXTENSIONS;
use crate::state::AppState;

pub async fn service_info(State(state): State<AppState>) -> Json<Value> {
    let registry = state.registry();
    let config = state.config();

    Json(json!({
        "service": "docparse-server",
        "version": env!("CARGO_PKG_VERSION"),
        "runtimeMode": registry.mode(),
        "activeBackends": registry.active(),
        "defaultBackend": registry.default_backend(),
        "endpoints": {
            "parse": "POST /v2/parse/file",
            "health": "GET /health",
            "backends": "GET /backends",
            "backendConfig": "GET /backends/{backend}/config",
            "metrics": "GET /metrics",
            "modeSwitch": "GET /mode/switch",
        },
        "supportedExtensions": SUPPORTED_EXTENSIONS,
        "maxFileSizeMb": config.upload.max_file_size / (1024 * 1024),
        "workers": state.pool().worker_count(),
        "configuration": {
            "PARSE_MODE": "pipeline | vlm",
            "PARSE_VLM_BACKEND": "active backend in vlm mode",
            "PARSE_SERVER_URL": "default server_url for client backends",
            "PROCESSES_PER_DEVICE": "workers per accelerator device",
            "MAX_FILE_SIZE_MB": "upload cap",
            "CLEANUP_DELAY_SECS": "seconds before scratch output is removed",
        },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(service_info))
}
