pub mod error;
pub mod handlers;
pub mod state;


use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use state::ApiState;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/internal/alerts/activate", post(handlers::alerts::activate))
        .route("/internal/alerts/deactivate", post(handlers::alerts::deactivate))
        .route("/internal/alerts/{id}/state", get(handlers::alerts::state))
        .route("/internal/subscriptions/subscribe", post(handlers::subscriptions::subscribe))
        .route("/internal/subscriptions/unsubscribe", post(handlers::subscriptions::unsubscribe))
        .route("/internal/webhooks/verify", post(handlers::webhooks::verify))
        .route("/internal/engine/status", get(handlers::status::status))
        .route("/metrics", get(handlers::metrics::render))
        .with_state(state)
}

pub async fn serve(state: Arc<ApiState>, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "internal_api_listening");
    axum::serve(listener, app).await?;
    Ok(())
}
