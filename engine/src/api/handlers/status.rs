use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::state::ApiState;
use crate::condition::registry;

#[derive(Serialize)]
pub struct EngineStatusResponse {
    pub active_alerts: usize,
    pub active_subscriptions: usize,
    pub groups: usize,
    pub timeframes: Vec<String>,
    pub uptime_secs: u64,
}

pub async fn status(State(state): State<Arc<ApiState>>) -> Json<EngineStatusResponse> {
    let (active_alerts, active_subscriptions) = registry::counts(&state.registry).await;
    let groups = registry::groups(&state.registry).await.len();

    Json(EngineStatusResponse {
        active_alerts,
        active_subscriptions,
        groups,
        timeframes: state.timeframes.iter().map(|tf| tf.to_string()).collect(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
