//! Health check endpoints

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{Backend, RuntimeMode};
use crate::dispatch::SUPPORTED_EXTENSIONS;
use crate::pool::PoolStats;
use crate::scratch::ScratchStats;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTest {
    pub scratch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub runtime_mode: RuntimeMode,
    pub active_backends: Vec<Backend>,
    pub default_backend: Backend,
    pub accelerator_devices: usize,
    pub workers: usize,
    pub pool: PoolStats,
    pub scratch: ScratchStats,
    pub max_file_size_mb: u64,
    pub supported_extensions: &'static [&'static str],
    pub server_url: Option<String>,
    pub server_url_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub self_test: SelfTest,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let self_test = match state.scratch().self_test().await {
        Ok(()) => SelfTest {
            scratch: true,
            error: None,
        },
        Err(e) => {
            tracing::error!("Health self-test failed: {}", e);
            SelfTest {
                scratch: false,
                error: Some(e.to_string()),
            }
        }
    };

    let registry = state.registry();
    let default_backend = registry.default_backend();
    let server_url = registry.default_server_url().map(String::from);
    let needs_url = default_backend.descriptor().requires_external_server_url;

    let server_url_status = match (&server_url, needs_url) {
        (Some(_), _) => "configured",
        (None, true) => "missing",
        (None, false) => "not_required",
    };
    let warning = (server_url.is_none() && needs_url).then(|| {
        format!(
            "Backend {} requires server_url; set PARSE_SERVER_URL or pass it per request",
            default_backend
        )
    });

    let pool = state.pool().stats();
    let (status, code) = if self_test.scratch {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        service: "docparse-server",
        timestamp: Utc::now(),
        uptime_secs: (Utc::now() - state.started_at()).num_seconds(),
        runtime_mode: registry.mode(),
        active_backends: registry.active().to_vec(),
        default_backend,
        accelerator_devices: pool.device_count,
        workers: pool.workers,
        pool,
        scratch: state.scratch().stats(),
        max_file_size_mb: state.config().upload.max_file_size / (1024 * 1024),
        supported_extensions: SUPPORTED_EXTENSIONS,
        server_url,
        server_url_status,
        warning,
        self_test,
    };

    (code, Json(response))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
}
