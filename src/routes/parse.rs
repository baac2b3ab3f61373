//! Document parse endpoint

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::dispatch::ParseUpload;
use crate::error::AppError;
use crate::state::AppState;

/// Parse one uploaded document
///
/// Multipart body: a `file` part plus flat form options (`backend`,
/// `parse_method`, `output_format`, `lang`, `page_range`, ...).
pub async fn parse_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let _in_flight = state.requests().enter();

    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => return AppError::from(rejection).into_response(),
    };
    let upload = match ParseUpload::from_multipart(multipart).await {
        Ok(upload) => upload,
        Err(e) => return e.into_response(),
    };

    match state.dispatcher().dispatch(upload).await {
        Ok(response) => Json(response).into_response(),
        Err(failure) => failure.into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/file", post(parse_file))
}
