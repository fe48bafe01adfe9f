use anyhow::Result;
use std::time::Duration;

use crate::condition::registry::{self, AlertRegistry};
use crate::condition::state::AlertRuntime;

const STATE_TTL_SECS: u64 = 3600;
const PERSIST_INTERVAL: Duration = Duration::from_secs(10);

pub fn state_key(alert_id: &str) -> String {
    format!("alertflow:alert_state:{alert_id}")
}

pub async fn save_states(conn: &mut redis::aio::MultiplexedConnection, registry: &AlertRegistry) -> Result<()> {
    let states = registry::runtime_states(registry).await;
    if states.is_empty() {
        return Ok(());
    }

    let mut pipe = redis::pipe();
    for (alert_id, runtime) in &states {
        let json = serde_json::to_string(runtime)?;
        pipe.set_ex(state_key(alert_id), json, STATE_TTL_SECS);
    }
    pipe.query_async::<()>(conn).await?;
    tracing::debug!(count = states.len(), "redis_states_saved");
    Ok(())
}

pub async fn load_state(conn: &mut redis::aio::MultiplexedConnection, alert_id: &str) -> Result<Option<AlertRuntime>> {
    let json: Option<String> = redis::cmd("GET").arg(state_key(alert_id)).query_async(conn).await?;
    match json {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub async fn run_state_persister(redis_url: &str, registry: AlertRegistry) -> Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut conn = client.get_multiplexed_tokio_connection().await?;
    tracing::info!("redis_state_persister_started");

    let mut interval = tokio::time::interval(PERSIST_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = save_states(&mut conn, &registry).await {
            tracing::warn!(error = %e, "redis_state_save_failed");
        }
    }
}
