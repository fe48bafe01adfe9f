use std::time::Duration;

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use serde_json::Value;

use crate::condition::normalize::normalize_alert;
use crate::condition::registry::{self, AlertRegistry};
use crate::condition::FireMode;
use crate::storage::{redis as state_store, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub active: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub restored: usize,
    pub invalid: usize,
    /// Left to the API because it changed them mid-sync.
    pub skipped: usize,
    pub subscriptions: usize,
}

/// Reconcile the in-memory registry with storage. New alerts pick up their
/// persisted runtime state when a Redis connection is given, unchanged ones
/// keep the state they have, and alerts no longer stored are dropped.
/// Alerts activated or deactivated through the API while storage is being
/// read keep their API state until the next sync.
pub async fn sync_registry(
    store: &dyn Store,
    registry: &AlertRegistry,
    mut redis: Option<&mut MultiplexedConnection>,
    default_fire_mode: FireMode,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let since = registry::epoch(registry).await;
    let records = store.load_active_alerts().await?;
    let mut stored = Vec::with_capacity(records.len());

    for record in records {
        let mut definition = record.definition;
        if let Some(obj) = definition.as_object_mut() {
            obj.entry("id").or_insert_with(|| Value::String(record.id.clone()));
        }
        let alert = match normalize_alert(&definition, default_fire_mode) {
            Ok(a) => a,
            Err(e) => {
                report.invalid += 1;
                tracing::warn!(alert_id = %record.id, error = %e, "alert_definition_invalid");
                continue;
            }
        };

        let mut initial = None;
        if registry::get(registry, &alert.id).await.is_none() {
            if let Some(conn) = redis.as_deref_mut() {
                match state_store::load_state(conn, &alert.id).await {
                    Ok(state) => {
                        report.restored += usize::from(state.is_some());
                        initial = state;
                    }
                    Err(e) => tracing::warn!(alert_id = %alert.id, error = %e, "alert_state_restore_failed"),
                }
            }
        }
        stored.push((alert, initial));
    }
    report.active = stored.len();

    let applied = registry::reconcile(registry, stored, since).await;
    report.added = applied.added;
    report.updated = applied.updated;
    report.removed = applied.removed;
    report.skipped = applied.skipped;

    let subscriptions = store.load_active_subscriptions().await?;
    report.subscriptions = subscriptions.len();
    registry::replace_subscriptions(registry, subscriptions).await;

    Ok(report)
}

pub async fn run(
    store: &dyn Store,
    registry: AlertRegistry,
    redis_url: &str,
    interval: Duration,
    default_fire_mode: FireMode,
) -> Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut conn = client.get_multiplexed_tokio_connection().await?;
    tracing::info!(interval_secs = interval.as_secs(), "registry_sync_started");

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match sync_registry(store, &registry, Some(&mut conn), default_fire_mode).await {
            Ok(r) if r.added + r.updated + r.removed > 0 => tracing::info!(
                alerts = r.active,
                added = r.added,
                updated = r.updated,
                removed = r.removed,
                subscriptions = r.subscriptions,
                "registry_synced"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "registry_sync_failed"),
        }
    }
}
