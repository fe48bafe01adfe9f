use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::api::error::ApiError;
use crate::api::state::ApiState;

pub async fn render(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    let handle = state.prometheus.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    ))
}
