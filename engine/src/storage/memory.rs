use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AlertRecord, DeliveryAudit, Notification, Store};
use crate::dispatch::{Subscription, TriggerEvent};

#[derive(Default)]
struct Inner {
    alerts: BTreeMap<String, (AlertRecord, bool)>,
    subscriptions: Vec<Subscription>,
    triggers: Vec<TriggerEvent>,
    deliveries: Vec<DeliveryAudit>,
    notifications: Vec<Notification>,
    bot_queue: Vec<(String, TriggerEvent)>,
    bot_keys: HashSet<(String, String)>,
}

/// Process-local store for `STORE_BACKEND=memory` and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn triggers(&self) -> Vec<TriggerEvent> {
        self.lock().triggers.clone()
    }

    pub fn deliveries(&self) -> Vec<DeliveryAudit> {
        self.lock().deliveries.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    pub fn bot_queue(&self) -> Vec<(String, TriggerEvent)> {
        self.lock().bot_queue.clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock().subscriptions.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_active_alerts(&self) -> Result<Vec<AlertRecord>> {
        Ok(self
            .lock()
            .alerts
            .values()
            .filter(|(_, active)| *active)
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn save_alert(&self, record: &AlertRecord) -> Result<()> {
        self.lock().alerts.insert(record.id.clone(), (record.clone(), true));
        Ok(())
    }

    async fn deactivate_alert(&self, alert_id: &str) -> Result<bool> {
        Ok(match self.lock().alerts.get_mut(alert_id) {
            Some((_, active)) if *active => {
                *active = false;
                true
            }
            _ => false,
        })
    }

    async fn load_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.lock().subscriptions.iter().filter(|s| s.active).cloned().collect())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.lock();
        inner.subscriptions.retain(|s| s.id != subscription.id);
        inner.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn deactivate_subscription(&self, subscriber_id: &str, condition_id: &str) -> Result<u64> {
        let mut count = 0;
        for s in self.lock().subscriptions.iter_mut() {
            if s.active && s.subscriber_id == subscriber_id && s.condition_id == condition_id {
                s.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn touch_subscription(&self, subscription_id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(s) = self.lock().subscriptions.iter_mut().find(|s| s.id == subscription_id) {
            s.last_triggered_at = Some(at);
        }
        Ok(())
    }

    async fn record_trigger(&self, event: &TriggerEvent) -> Result<()> {
        self.lock().triggers.push(event.clone());
        Ok(())
    }

    async fn record_delivery(&self, audit: &DeliveryAudit) -> Result<()> {
        self.lock().deliveries.push(audit.clone());
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.lock().notifications.push(notification.clone());
        Ok(())
    }

    async fn enqueue_bot_trigger(&self, bot_id: &str, event: &TriggerEvent) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.bot_keys.insert((bot_id.to_string(), event.event_id.clone())) {
            return Ok(false);
        }
        inner.bot_queue.push((bot_id.to_string(), event.clone()));
        Ok(true)
    }
}
