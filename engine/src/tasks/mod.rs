mod bot_router;
mod evaluation;
mod persistence;
pub mod registry_sync;

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::condition::registry::AlertRegistry;
use crate::config::Config;
use crate::dispatch::broker::MemoryBroker;
use crate::dispatch::Distributor;
use crate::market::indicators::IndicatorEngine;
use crate::market::source::MarketData;
use crate::storage::Store;

pub struct SharedState {
    pub config: Config,
    pub registry: AlertRegistry,
    pub store: Arc<dyn Store>,
    pub distributor: Arc<Distributor>,
    pub market: Arc<dyn MarketData>,
    pub indicators: Arc<dyn IndicatorEngine>,
    /// Set when Kafka is disabled; the bot router subscribes to it instead.
    pub memory_broker: Option<Arc<MemoryBroker>>,
}

pub async fn spawn_all(state: &SharedState, tasks: &mut JoinSet<anyhow::Result<()>>) -> anyhow::Result<()> {
    // Populate the registry before the first tick
    let redis_client = redis::Client::open(state.config.redis_url.as_str())?;
    let mut conn = redis_client.get_multiplexed_tokio_connection().await?;
    let report = registry_sync::sync_registry(
        state.store.as_ref(),
        &state.registry,
        Some(&mut conn),
        state.config.default_fire_mode,
    )
    .await?;
    tracing::info!(
        alerts = report.active,
        restored = report.restored,
        invalid = report.invalid,
        subscriptions = report.subscriptions,
        "registry_loaded"
    );

    evaluation::spawn_registry_sync(state, tasks);
    evaluation::spawn_scheduler(state, tasks);
    persistence::spawn_redis_state_persister(state, tasks);

    if state.config.bot_router_enabled {
        bot_router::spawn_bot_router(state, tasks);
    }
    Ok(())
}
