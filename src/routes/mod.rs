//! HTTP routes for the parse server

pub mod backends;
pub mod health;
pub mod info;
pub mod metrics;
pub mod parse;

use axum::{extract::DefaultBodyLimit, Router};
use tower_http::compression::{predicate::SizeAbove, CompressionLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Slack above the file cap for multipart framing and form fields
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Responses smaller than this are sent uncompressed
const COMPRESSION_MIN_SIZE: u16 = 1000;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let body_limit = (state.config().upload.max_file_size + MULTIPART_OVERHEAD) as usize;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(info::router())
        .merge(health::router())
        .merge(metrics::router())
        .nest("/backends", backends::router())
        .nest("/v2/parse", parse::router().layer(DefaultBodyLimit::max(body_limit)))
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(COMPRESSION_MIN_SIZE)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
