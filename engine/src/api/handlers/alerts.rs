use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::condition::normalize::normalize_alert;
use crate::condition::registry::{self, Activation};
use crate::condition::state::AlertRuntime;
use crate::condition::FireMode;
use crate::storage::AlertRecord;

#[derive(Serialize)]
pub struct ActivateResponse {
    pub alert_id: String,
    pub status: &'static str,
    /// False when the alert's timeframe is not among the scanned ones.
    pub scanned: bool,
}

/// Accepts a raw alert definition. Anything that does not normalize is a 422.
pub async fn activate(
    State(state): State<Arc<ApiState>>,
    Json(definition): Json<Value>,
) -> Result<Json<ActivateResponse>, ApiError> {
    let alert = normalize_alert(&definition, state.default_fire_mode)?;
    let alert_id = alert.id.clone();
    let scanned = state.timeframes.contains(&alert.timeframe);

    state
        .store
        .save_alert(&AlertRecord {
            id: alert_id.clone(),
            definition,
        })
        .await?;

    let status = match registry::activate(&state.registry, alert, None).await {
        Activation::Added => "added",
        Activation::Updated => "updated",
        Activation::Unchanged => "unchanged",
    };
    if !scanned {
        tracing::warn!(alert_id = %alert_id, "alert_timeframe_not_scanned");
    }

    Ok(Json(ActivateResponse {
        alert_id,
        status,
        scanned,
    }))
}

#[derive(Deserialize)]
pub struct DeactivateRequest {
    pub alert_id: String,
}

#[derive(Serialize)]
pub struct DeactivateResponse {
    pub alert_id: String,
    pub removed: bool,
}

pub async fn deactivate(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<DeactivateRequest>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    state.store.deactivate_alert(&req.alert_id).await?;
    let removed = registry::deactivate(&state.registry, &req.alert_id).await;
    Ok(Json(DeactivateResponse {
        alert_id: req.alert_id,
        removed,
    }))
}

#[derive(Serialize)]
pub struct AlertStateResponse {
    pub alert_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub fire_mode: FireMode,
    pub runtime: AlertRuntime,
}

pub async fn state(
    State(app): State<Arc<ApiState>>,
    Path(alert_id): Path<String>,
) -> Result<Json<AlertStateResponse>, ApiError> {
    let entry = registry::get(&app.registry, &alert_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("alert {alert_id} is not active")))?;
    let runtime = entry.runtime().clone();

    Ok(Json(AlertStateResponse {
        alert_id,
        symbol: entry.alert.symbol.clone(),
        timeframe: entry.alert.timeframe.to_string(),
        fire_mode: entry.alert.fire_mode,
        runtime,
    }))
}
