use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::state::AlertRuntime;
use super::{Alert, AlertId};
use crate::dispatch::Subscription;
use crate::market::models::Timeframe;

#[derive(Clone)]
pub struct RegisteredAlert {
    pub alert: Arc<Alert>,
    pub runtime: Arc<Mutex<AlertRuntime>>,
}

impl RegisteredAlert {
    /// Lock the runtime state. A panic inside a previous evaluation leaves the
    /// state usable, so poisoning is ignored.
    pub fn runtime(&self) -> MutexGuard<'_, AlertRuntime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Alerts sharing a key are evaluated against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

#[derive(Default)]
pub struct Registry {
    alerts: HashMap<AlertId, RegisteredAlert>,
    /// Keyed by condition id. Inactive subscriptions are kept for audit.
    subscriptions: HashMap<AlertId, Vec<Subscription>>,
    /// Bumped by every direct activate/deactivate.
    epoch: u64,
    /// Epoch of the last direct change per alert, kept until a storage
    /// sync that started after it has run.
    changed_at: HashMap<AlertId, u64>,
}

impl Registry {
    fn mark_changed(&mut self, id: &str) {
        self.epoch += 1;
        self.changed_at.insert(id.to_string(), self.epoch);
    }

    fn changed_since(&self, id: &str, epoch: u64) -> bool {
        self.changed_at.get(id).is_some_and(|e| *e > epoch)
    }

    fn upsert(&mut self, alert: Alert, initial_state: Option<AlertRuntime>) -> Activation {
        let id = alert.id.clone();
        let outcome = match self.alerts.get(&id) {
            Some(existing) if *existing.alert == alert => Activation::Unchanged,
            Some(existing) => {
                let mut runtime = existing.runtime().clone();
                runtime.latches.clear();
                runtime.missing_streak = 0;
                runtime.warned_unresolvable = false;
                self.alerts.insert(
                    id.clone(),
                    RegisteredAlert {
                        alert: Arc::new(alert),
                        runtime: Arc::new(Mutex::new(runtime)),
                    },
                );
                Activation::Updated
            }
            None => {
                self.alerts.insert(
                    id.clone(),
                    RegisteredAlert {
                        alert: Arc::new(alert),
                        runtime: Arc::new(Mutex::new(initial_state.unwrap_or_default())),
                    },
                );
                Activation::Added
            }
        };
        if outcome != Activation::Unchanged {
            tracing::info!(alert_id = %id, ?outcome, "alert_activated");
        }
        outcome
    }
}

pub type AlertRegistry = Arc<RwLock<Registry>>;

pub fn new_registry() -> AlertRegistry {
    Arc::new(RwLock::new(Registry::default()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Added,
    Updated,
    Unchanged,
}

/// Register or replace an alert. An unchanged definition keeps its runtime
/// state; an edited one keeps `last_fired_at` but drops latches, since entry
/// ids may now mean something else.
pub async fn activate(registry: &AlertRegistry, alert: Alert, initial_state: Option<AlertRuntime>) -> Activation {
    let mut reg = registry.write().await;
    reg.mark_changed(&alert.id);
    reg.upsert(alert, initial_state)
}

pub async fn deactivate(registry: &AlertRegistry, alert_id: &str) -> bool {
    let mut reg = registry.write().await;
    reg.mark_changed(alert_id);
    let removed = reg.alerts.remove(alert_id).is_some();
    if removed {
        tracing::info!(alert_id, "alert_deactivated");
    }
    removed
}

/// Current change epoch. Take it before reading storage and pass it to
/// [`reconcile`].
pub async fn epoch(registry: &AlertRegistry) -> u64 {
    registry.read().await.epoch
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Alerts left alone because they were changed directly after `since`.
    pub skipped: usize,
}

/// Make the registry match `stored`, a storage read that began at epoch
/// `since`. Alerts activated or deactivated directly after `since` keep
/// their current registration. Runs under one write lock.
pub async fn reconcile(
    registry: &AlertRegistry,
    stored: Vec<(Alert, Option<AlertRuntime>)>,
    since: u64,
) -> Reconciled {
    let mut reg = registry.write().await;
    let mut report = Reconciled::default();
    let mut keep: HashSet<AlertId> = HashSet::with_capacity(stored.len());

    for (alert, initial) in stored {
        keep.insert(alert.id.clone());
        if reg.changed_since(&alert.id, since) {
            report.skipped += 1;
            continue;
        }
        match reg.upsert(alert, initial) {
            Activation::Added => report.added += 1,
            Activation::Updated => report.updated += 1,
            Activation::Unchanged => {}
        }
    }

    let stale: Vec<AlertId> = reg
        .alerts
        .keys()
        .filter(|id| !keep.contains(*id) && !reg.changed_since(id, since))
        .cloned()
        .collect();
    for id in &stale {
        reg.alerts.remove(id);
        tracing::info!(alert_id = %id, "alert_deactivated");
    }
    report.removed = stale.len();

    reg.changed_at.retain(|_, e| *e > since);
    report
}

pub async fn get(registry: &AlertRegistry, alert_id: &str) -> Option<RegisteredAlert> {
    registry.read().await.alerts.get(alert_id).cloned()
}

/// Current alerts grouped by (symbol, timeframe), in key order.
pub async fn groups(registry: &AlertRegistry) -> Vec<(GroupKey, Vec<RegisteredAlert>)> {
    let reg = registry.read().await;
    let mut grouped: BTreeMap<GroupKey, Vec<RegisteredAlert>> = BTreeMap::new();
    for entry in reg.alerts.values() {
        let key = GroupKey {
            symbol: entry.alert.symbol.clone(),
            timeframe: entry.alert.timeframe,
        };
        grouped.entry(key).or_default().push(entry.clone());
    }
    for alerts in grouped.values_mut() {
        alerts.sort_by(|a, b| a.alert.id.cmp(&b.alert.id));
    }
    grouped.into_iter().collect()
}

/// Snapshot of every alert's runtime state, for persistence.
pub async fn runtime_states(registry: &AlertRegistry) -> Vec<(AlertId, AlertRuntime)> {
    let reg = registry.read().await;
    reg.alerts
        .iter()
        .map(|(id, entry)| (id.clone(), entry.runtime().clone()))
        .collect()
}

// ── Subscriptions ──

/// Add a subscription, replacing an active one from the same subscriber.
pub async fn subscribe(registry: &AlertRegistry, subscription: Subscription) {
    let mut reg = registry.write().await;
    let list = reg.subscriptions.entry(subscription.condition_id.clone()).or_default();
    list.retain(|s| !(s.active && s.subscriber_id == subscription.subscriber_id && s.kind == subscription.kind));
    tracing::info!(
        condition_id = %subscription.condition_id,
        subscriber_id = %subscription.subscriber_id,
        "subscription_added"
    );
    list.push(subscription);
}

/// Soft-delete: the subscription stays listed with `active = false`.
pub async fn unsubscribe(registry: &AlertRegistry, subscriber_id: &str, condition_id: &str) -> Vec<Subscription> {
    let mut reg = registry.write().await;
    let mut deactivated = Vec::new();
    if let Some(list) = reg.subscriptions.get_mut(condition_id) {
        for s in list.iter_mut().filter(|s| s.active && s.subscriber_id == subscriber_id) {
            s.active = false;
            deactivated.push(s.clone());
        }
    }
    if !deactivated.is_empty() {
        tracing::info!(condition_id, subscriber_id, "subscription_removed");
    }
    deactivated
}

pub async fn active_subscriptions(registry: &AlertRegistry, condition_id: &str) -> Vec<Subscription> {
    registry
        .read()
        .await
        .subscriptions
        .get(condition_id)
        .map(|list| list.iter().filter(|s| s.active).cloned().collect())
        .unwrap_or_default()
}

/// Replace the subscription table wholesale (storage sync).
pub async fn replace_subscriptions(registry: &AlertRegistry, subscriptions: Vec<Subscription>) {
    let mut table: HashMap<AlertId, Vec<Subscription>> = HashMap::new();
    for s in subscriptions {
        table.entry(s.condition_id.clone()).or_default().push(s);
    }
    registry.write().await.subscriptions = table;
}

pub async fn touch_subscriptions(registry: &AlertRegistry, condition_id: &str, at: DateTime<Utc>) {
    if let Some(list) = registry.write().await.subscriptions.get_mut(condition_id) {
        for s in list.iter_mut().filter(|s| s.active) {
            s.last_triggered_at = Some(at);
        }
    }
}

/// (alerts, active subscriptions)
pub async fn counts(registry: &AlertRegistry) -> (usize, usize) {
    let reg = registry.read().await;
    let subs = reg.subscriptions.values().flatten().filter(|s| s.active).count();
    (reg.alerts.len(), subs)
}
