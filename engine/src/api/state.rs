use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::condition::registry::AlertRegistry;
use crate::condition::FireMode;
use crate::dispatch::webhook::WebhookVerifier;
use crate::market::models::Timeframe;
use crate::storage::Store;

pub struct ApiState {
    pub registry: AlertRegistry,
    pub store: Arc<dyn Store>,
    pub default_fire_mode: FireMode,
    /// Timeframes the scheduler scans.
    pub timeframes: Vec<Timeframe>,
    pub start_time: std::time::Instant,
    pub prometheus: Option<PrometheusHandle>,
    /// Checks signed deliveries against the engine's default secret.
    pub verifier: Option<Arc<WebhookVerifier>>,
}
