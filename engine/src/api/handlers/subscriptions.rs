use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::condition::registry;
use crate::dispatch::{SubscriberKind, Subscription};

#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub subscriber_id: String,
    pub condition_id: String,
    pub subscriber: SubscriberKind,
}

#[derive(Serialize)]
pub struct SubscribeResponse {
    pub subscription_id: String,
}

pub async fn subscribe(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    if req.subscriber_id.trim().is_empty() {
        return Err(ApiError::Validation("subscriber_id must not be empty".into()));
    }
    if let SubscriberKind::Webhook { url, .. } = &req.subscriber {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ApiError::Validation("webhook url must be http(s)".into()));
        }
    }
    if registry::get(&state.registry, &req.condition_id).await.is_none() {
        return Err(ApiError::NotFound(format!("condition {} is not active", req.condition_id)));
    }

    let subscription = Subscription {
        id: uuid::Uuid::new_v4().to_string(),
        subscriber_id: req.subscriber_id,
        condition_id: req.condition_id,
        kind: req.subscriber,
        active: true,
        last_triggered_at: None,
    };
    state.store.save_subscription(&subscription).await?;
    let subscription_id = subscription.id.clone();
    registry::subscribe(&state.registry, subscription).await;

    Ok(Json(SubscribeResponse { subscription_id }))
}

#[derive(Deserialize)]
pub struct UnsubscribeRequest {
    pub subscriber_id: String,
    pub condition_id: String,
}

#[derive(Serialize)]
pub struct UnsubscribeResponse {
    pub deactivated: usize,
}

/// Soft delete: rows stay in storage with `is_active = false`.
pub async fn unsubscribe(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    state
        .store
        .deactivate_subscription(&req.subscriber_id, &req.condition_id)
        .await?;
    let deactivated = registry::unsubscribe(&state.registry, &req.subscriber_id, &req.condition_id).await;
    Ok(Json(UnsubscribeResponse {
        deactivated: deactivated.len(),
    }))
}
