mod api;
mod condition;
mod config;
mod dispatch;
mod error;
mod fire;
mod healthcheck;
mod kafka;
mod market;
mod metrics;
mod scheduler;
mod storage;
mod supervisor;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use condition::registry;
use config::{Config, StoreBackend, WEBHOOK_BACKOFF_BASE};
use dispatch::broker::{Broker, KafkaBroker, MemoryBroker};
use dispatch::idempotency::RedisDedupStore;
use dispatch::webhook::{ReqwestTransport, WebhookSender, WebhookVerifier};
use dispatch::Distributor;
use market::indicators::BuiltinIndicators;
use market::source::KlinesSource;
use storage::Store;
use tasks::SharedState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let prometheus_handle = metrics::init();
    let cfg = Config::from_env()?;
    tracing::info!(
        timeframes = cfg.eval_timeframes.len(),
        store = ?cfg.store_backend,
        kafka = cfg.kafka_enabled(),
        "alertflow_engine_starting"
    );

    let database_url = (cfg.store_backend == StoreBackend::Postgres).then_some(cfg.database_url.as_str());
    healthcheck::wait_for_services(&cfg.redis_url, database_url).await?;

    let store: Arc<dyn Store> = match cfg.store_backend {
        StoreBackend::Postgres => {
            let pool = storage::postgres::create_pool(&cfg.database_url).await?;
            storage::postgres::run_migrations(&pool).await?;
            Arc::new(storage::postgres::PgStore::new(pool))
        }
        StoreBackend::Memory => Arc::new(storage::memory::MemoryStore::default()),
    };

    let (broker, memory_broker): (Arc<dyn Broker>, Option<Arc<MemoryBroker>>) = if cfg.kafka_enabled() {
        let producer = kafka::producer::create_producer(&cfg.kafka_brokers)?;
        (Arc::new(KafkaBroker::new(producer)), None)
    } else {
        let memory = Arc::new(MemoryBroker::new(1024));
        (memory.clone(), Some(memory))
    };

    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let dedup = Arc::new(RedisDedupStore::new(redis_client.get_multiplexed_tokio_connection().await?));
    let verifier = Arc::new(WebhookVerifier::new(
        cfg.webhook_secret.clone(),
        cfg.webhook_max_age,
        dedup.clone(),
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let webhooks = WebhookSender::new(
        Arc::new(ReqwestTransport::new(http.clone())),
        cfg.webhook_max_retries,
        WEBHOOK_BACKOFF_BASE,
        cfg.webhook_timeout,
    );

    let registry = registry::new_registry();
    let distributor = Arc::new(Distributor::new(
        broker,
        webhooks,
        store.clone(),
        registry.clone(),
        dedup,
        cfg.webhook_secret.clone(),
    ));

    let market = Arc::new(KlinesSource::new(http, &cfg.market_data_url));

    let state = SharedState {
        config: cfg,
        registry,
        store,
        distributor,
        market,
        indicators: Arc::new(BuiltinIndicators),
        memory_broker,
    };

    let mut tasks = JoinSet::new();
    tasks::spawn_all(&state, &mut tasks).await?;

    // Internal API server
    let api_state = Arc::new(api::state::ApiState {
        registry: state.registry.clone(),
        store: state.store.clone(),
        default_fire_mode: state.config.default_fire_mode,
        timeframes: state.config.eval_timeframes.clone(),
        start_time: std::time::Instant::now(),
        prometheus: Some(prometheus_handle),
        verifier: Some(verifier),
    });
    let api_port = state.config.api_port;
    tasks.spawn(async move { api::serve(api_state, api_port).await });

    tracing::info!("alertflow_engine_running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("alertflow_engine_shutdown");
        }
        Some(result) = tasks.join_next() => {
            match result {
                Ok(Ok(())) => tracing::error!("task_exited_unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "task_fatal"),
                Err(e) => tracing::error!(error = %e, "task_panicked"),
            }
        }
    }

    tasks.shutdown().await;
    tracing::info!("alertflow_engine_stopped");
    Ok(())
}
