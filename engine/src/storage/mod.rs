pub mod memory;
pub mod postgres;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::{Subscription, TriggerEvent};

/// Stored alert definition, normalized on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub definition: serde_json::Value,
}

/// One webhook delivery attempt sequence, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAudit {
    pub event_id: String,
    pub alert_id: String,
    pub subscription_id: Option<String>,
    pub url: String,
    pub attempts: u32,
    pub status_code: Option<u16>,
    pub delivered: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub alert_id: String,
    pub event_id: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Registry and audit persistence.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_active_alerts(&self) -> Result<Vec<AlertRecord>>;
    async fn save_alert(&self, record: &AlertRecord) -> Result<()>;
    async fn deactivate_alert(&self, alert_id: &str) -> Result<bool>;

    async fn load_active_subscriptions(&self) -> Result<Vec<Subscription>>;
    async fn save_subscription(&self, subscription: &Subscription) -> Result<()>;
    /// Soft delete. Returns how many subscriptions were deactivated.
    async fn deactivate_subscription(&self, subscriber_id: &str, condition_id: &str) -> Result<u64>;
    async fn touch_subscription(&self, subscription_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Audit row for a fired trigger plus the alert's counters.
    async fn record_trigger(&self, event: &TriggerEvent) -> Result<()>;
    async fn record_delivery(&self, audit: &DeliveryAudit) -> Result<()>;
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;
    /// Idempotent on (bot id, event id). `true` if newly queued.
    async fn enqueue_bot_trigger(&self, bot_id: &str, event: &TriggerEvent) -> Result<bool>;
}
