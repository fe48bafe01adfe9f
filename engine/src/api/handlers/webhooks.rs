use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::dispatch::webhook::{EVENT_ID_HEADER, SIGNATURE_HEADER};

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub event_id: String,
}

/// Receiver-side check of a signed delivery: signature, age, event id
/// binding, then replay.
pub async fn verify(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<VerifyResponse>, ApiError> {
    let verifier = state.verifier.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {SIGNATURE_HEADER} header")))?;
    let event_id = headers
        .get(EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation(format!("missing {EVENT_ID_HEADER} header")))?;

    let event_id = verifier
        .verify(&body, header, event_id, chrono::Utc::now().timestamp())
        .await?;

    Ok(Json(VerifyResponse { valid: true, event_id }))
}
